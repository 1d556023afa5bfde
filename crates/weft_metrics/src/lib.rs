//! Weft Metrics - counters and timing windows for the task layer
//!
//! Everything here compiles down to no-op stubs unless the `metrics`
//! feature is enabled, so instrumentation can stay in hot paths.
//!
//! # Feature Flags
//!
//! - `metrics` - Enable metrics collection (default: disabled)
//!
//! # Usage
//!
//! ```ignore
//! use weft_metrics::{Counter, SampleWindow};
//!
//! let counter = Counter::new();
//! counter.increment("batches.scheduled", 1);
//!
//! let mut window = SampleWindow::new(32);
//! window.time(|| run_batch());
//! println!("avg: {:?}", window.average());
//! ```

#[cfg(feature = "metrics")]
mod counter;
#[cfg(feature = "metrics")]
mod window;

#[cfg(feature = "metrics")]
pub use counter::Counter;
#[cfg(feature = "metrics")]
pub use window::SampleWindow;

/// Whether collection is compiled in.
pub const ENABLED: bool = cfg!(feature = "metrics");

/// Execute code only when metrics are enabled
#[macro_export]
macro_rules! metrics {
    ($($tt:tt)*) => {
        #[cfg(feature = "metrics")]
        {
            $($tt)*
        }
    };
}

// ============================================================================
// No-op stubs when metrics disabled
// ============================================================================

#[cfg(not(feature = "metrics"))]
#[derive(Debug, Default)]
pub struct Counter;

#[cfg(not(feature = "metrics"))]
impl Counter {
    pub fn new() -> Self { Self }
    pub fn increment(&self, _name: &'static str, _value: u64) {}
    pub fn get(&self, _name: &str) -> u64 { 0 }
    pub fn reset_all(&self) {}
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> { Vec::new() }
}

#[cfg(not(feature = "metrics"))]
#[derive(Debug, Default)]
pub struct SampleWindow;

#[cfg(not(feature = "metrics"))]
impl SampleWindow {
    pub fn new(_capacity: usize) -> Self { Self }
    pub fn push(&mut self, _sample: std::time::Duration) {}
    pub fn time<F, R>(&mut self, f: F) -> R where F: FnOnce() -> R { f() }
    pub fn len(&self) -> usize { 0 }
    pub fn is_empty(&self) -> bool { true }
    pub fn average(&self) -> std::time::Duration { std::time::Duration::ZERO }
    pub fn min_max(&self) -> (std::time::Duration, std::time::Duration) {
        (std::time::Duration::ZERO, std::time::Duration::ZERO)
    }
}
