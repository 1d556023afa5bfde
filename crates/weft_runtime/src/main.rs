//! Weft Runtime
//!
//! Populates a demo world, times the parallel execution modes against a
//! sequential loop and checks that disposing a handle waits for its work.
//!
//! Usage: `weft [settings.json]`

mod components;
mod scenarios;
mod settings;

use anyhow::Result;
use settings::RuntimeSettings;
use std::sync::Arc;
use weft_core::ecs::World;
use weft_tasks::{RayonBackend, SlicePlanner, TaskSystem};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    tracing::info!("Weft v{}", weft_core::VERSION);

    let settings = match std::env::args().nth(1) {
        Some(path) => {
            tracing::info!(%path, "loading settings");
            RuntimeSettings::load(&path)?
        }
        None => RuntimeSettings::default(),
    };

    let backend = Arc::new(RayonBackend::new(&settings.tasks)?);
    let system = TaskSystem::with_backend(
        backend.clone(),
        SlicePlanner::new(settings.tasks.min_entities_per_batch),
    );

    let mut world = World::with_config(settings.world.clone())?;
    scenarios::populate(&mut world, settings.demo.entity_count)?;

    scenarios::compare_modes(
        &world,
        &system,
        settings.demo.iterations,
        settings.demo.batches_per_chunk,
    )?;

    scenarios::verify_dispose(
        &system,
        settings.demo.entity_count,
        settings.demo.batches_per_chunk,
    )?;

    for (name, value) in system.metrics().snapshot() {
        tracing::info!(name, value, "task metric");
    }
    if backend.panicked_items() > 0 {
        tracing::warn!(panicked = backend.panicked_items(), "work items panicked");
    }

    tracing::info!("Runtime finished");
    Ok(())
}
