//! Weft Core
//!
//! The data side of the parallel query layer:
//! - Component registration and identity
//! - Chunked archetype storage (`World`)
//! - Query shapes and chunk views consumed by the task layer
//! - Runtime component access leases

pub mod ecs;

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
