//! Weft Tasks
//!
//! Turns an entity query into independently schedulable work items and
//! tracks them through job handles:
//! - `SlicePlanner` splits chunks into `(chunk, start, count)` work items
//! - `QueryRunner` executes one work item by index
//! - `JobHandle` owns a batch's resources until the backend reports it done
//! - `combine` joins handles into one
//! - `TaskBackend` is the thread-pool capability, with a rayon implementation
//!
//! The `ParallelQuery*` extension traits put the three execution modes on
//! `weft_core::ecs::Query`.

pub mod backend;
pub mod combine;
pub mod error;
pub mod handle;
pub mod parallel;
pub mod planner;
pub mod rayon_backend;
pub mod runner;
pub mod settings;
pub mod store;
pub mod system;

pub use backend::{TaskBackend, TaskToken, WorkDescriptor};
pub use combine::combine;
pub use error::TaskError;
pub use handle::{HandleState, JobHandle};
pub use parallel::{ParallelQuery1, ParallelQuery2, ParallelQuery3};
pub use planner::{SlicePlanner, WorkItem, MIN_ENTITIES_PER_BATCH};
pub use rayon_backend::RayonBackend;
pub use runner::QueryRunner;
pub use settings::TaskSettings;
pub use store::HandleStore;
pub use system::{TaskMetrics, TaskSystem};
