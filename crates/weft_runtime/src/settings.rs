//! Runtime configuration, read from a JSON file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use weft_core::ecs::WorldConfig;
use weft_tasks::TaskSettings;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoSettings {
    /// Entities spawned into the demo world.
    pub entity_count: usize,
    /// Timed runs per execution mode.
    pub iterations: usize,
    /// Slices per chunk for the batched mode.
    pub batches_per_chunk: usize,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            entity_count: 100_000,
            iterations: 10,
            batches_per_chunk: 4,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub tasks: TaskSettings,
    pub world: WorldConfig,
    pub demo: DemoSettings,
}

impl RuntimeSettings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing settings in {}", path.display()))
    }
}
