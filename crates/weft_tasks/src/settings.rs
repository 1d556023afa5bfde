//! Task layer configuration, loaded from JSON.

use crate::error::TaskError;
use crate::planner::MIN_ENTITIES_PER_BATCH;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSettings {
    /// Worker threads in the pool; `0` lets rayon pick one per core.
    pub worker_threads: usize,
    pub thread_name_prefix: String,
    /// Chunks shorter than this are never split into several slices.
    pub min_entities_per_batch: usize,
    /// Scheduled batches allowed in flight at once; `0` disables
    /// asynchronous submission entirely.
    pub max_in_flight_batches: usize,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            thread_name_prefix: "weft-worker".to_string(),
            min_entities_per_batch: MIN_ENTITIES_PER_BATCH,
            max_in_flight_batches: 4096,
        }
    }
}

impl TaskSettings {
    pub fn from_json_str(json: &str) -> Result<Self, TaskError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TaskError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| TaskError::SettingsIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }
}
