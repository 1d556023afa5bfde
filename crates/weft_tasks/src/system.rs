//! Front object bundling a backend, the slice planner and task metrics.

use crate::backend::TaskBackend;
use crate::combine::combine_counted;
use crate::error::TaskError;
use crate::handle::JobHandle;
use crate::planner::SlicePlanner;
use crate::rayon_backend::RayonBackend;
use crate::settings::TaskSettings;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use weft_metrics::{Counter, SampleWindow};

pub const BATCHES_EXECUTED: &str = "batches.executed";
pub const BATCHES_SCHEDULED: &str = "batches.scheduled";
pub const BATCHES_INLINE: &str = "batches.inline";
pub const BATCHES_FALLBACK: &str = "batches.fallback";
pub const HANDLES_COMBINED: &str = "handles.combined";

const EXECUTE_WINDOW: usize = 64;

/// Counters and timings for the execution modes.
///
/// Collection compiles out without the `metrics` feature.
#[derive(Debug)]
pub struct TaskMetrics {
    counter: Counter,
    execute_times: Mutex<SampleWindow>,
}

impl Default for TaskMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskMetrics {
    pub fn new() -> Self {
        Self {
            counter: Counter::new(),
            execute_times: Mutex::new(SampleWindow::new(EXECUTE_WINDOW)),
        }
    }

    pub(crate) fn record(&self, name: &'static str, value: u64) {
        self.counter.increment(name, value);
    }

    /// Run `f`, recording its duration as a blocking execution.
    pub(crate) fn time_execute<R>(&self, f: impl FnOnce() -> R) -> R {
        let start = Instant::now();
        let result = f();
        let elapsed = start.elapsed();
        self.execute_times
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(elapsed);
        result
    }

    pub fn get(&self, name: &str) -> u64 {
        self.counter.get(name)
    }

    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        self.counter.snapshot()
    }

    /// Average duration of recent blocking executions.
    pub fn average_execute_time(&self) -> Duration {
        self.execute_times
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .average()
    }
}

/// Entry point for running queries in parallel.
pub struct TaskSystem {
    backend: Arc<dyn TaskBackend>,
    planner: SlicePlanner,
    metrics: TaskMetrics,
}

impl TaskSystem {
    /// A system on a fresh rayon pool.
    pub fn new(settings: &TaskSettings) -> Result<Self, TaskError> {
        let backend = RayonBackend::new(settings)?;
        Ok(Self::with_backend(
            Arc::new(backend),
            SlicePlanner::new(settings.min_entities_per_batch),
        ))
    }

    pub fn with_backend(backend: Arc<dyn TaskBackend>, planner: SlicePlanner) -> Self {
        Self {
            backend,
            planner,
            metrics: TaskMetrics::new(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn TaskBackend> {
        &self.backend
    }

    pub fn planner(&self) -> &SlicePlanner {
        &self.planner
    }

    pub fn metrics(&self) -> &TaskMetrics {
        &self.metrics
    }

    /// [`crate::combine`], counting the inputs that were actually joined.
    ///
    /// Trivial, disposed and detached inputs are not counted.
    pub fn combine<'q>(&self, handles: &mut [JobHandle<'q>]) -> JobHandle<'q> {
        let (combined, joined) = combine_counted(handles);
        self.metrics.record(HANDLES_COMBINED, joined as u64);
        combined
    }
}
