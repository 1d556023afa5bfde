// scenarios.rs - Demo world, mode timings and the dispose check
//
// The demo world mixes seven archetypes so queries see several chunk
// lists. Each execution mode runs the same per-entity updates and is timed
// over a few iterations.

use crate::components::{Health, Mana, Position, Rotation, Scale, Velocity};
use anyhow::{bail, Result};
use glam::{Quat, Vec3};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use weft_core::ecs::{Entity, EntityBuilder, World, WorldError};
use weft_metrics::SampleWindow;
use weft_tasks::{HandleStore, ParallelQuery1, ParallelQuery2, TaskSystem};

pub const DT: f32 = 1.0 / 60.0;
const ARCHETYPES: usize = 7;
const GRID_COLUMNS: usize = 100;
const GRID_SPACING: f32 = 2.0;
const MAX_HEALTH: u32 = 100;
const SPIN_RADIANS_PER_SEC: f32 = 1.5;

/// Entities the dispose check needs before its slices are worth splitting.
pub const MIN_VERIFY_ENTITIES: usize = 10_000;

/// Spawn `count` entities laid out on a grid, cycling through the demo
/// archetypes.
pub fn populate(world: &mut World, count: usize) -> Result<(), WorldError> {
    world.spawn_many(count, |i| {
        let row = (i / GRID_COLUMNS) as f32;
        let col = (i % GRID_COLUMNS) as f32;
        let position = Position(Vec3::new(col * GRID_SPACING, 0.0, row * GRID_SPACING));
        let velocity = Velocity(Vec3::new(1.0, 0.0, 0.5));
        let builder = EntityBuilder::new();
        match i % ARCHETYPES {
            0 => builder.with(position).with(velocity),
            1 => builder.with(position).with(velocity).with(Health(50)),
            2 => builder
                .with(position)
                .with(velocity)
                .with(Rotation(Quat::IDENTITY)),
            3 => builder.with(position).with(Health(50)).with(Mana(80)),
            4 => builder
                .with(position)
                .with(velocity)
                .with(Scale(Vec3::ONE)),
            5 => builder.with(Health(50)).with(Mana(80)),
            _ => builder
                .with(position)
                .with(velocity)
                .with(Health(50))
                .with(Mana(80)),
        }
    })?;
    tracing::info!(
        entities = world.entity_count(),
        archetypes = world.archetype_count(),
        chunks = world.chunk_count(),
        "demo world populated"
    );
    Ok(())
}

fn integrate(position: &mut Position, velocity: &mut Velocity, _: Entity) {
    position.0 += velocity.0 * DT;
}

fn regenerate(health: &mut Health, mana: &mut Mana, _: Entity) {
    if health.0 < MAX_HEALTH && mana.0 > 0 {
        health.0 += 1;
        mana.0 -= 1;
    }
}

fn spin(rotation: &mut Rotation, _: Entity) {
    let step = Quat::from_rotation_y(SPIN_RADIANS_PER_SEC * DT);
    rotation.0 = (step * rotation.0).normalize();
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModeTiming {
    pub mode: &'static str,
    pub average: Duration,
    pub min: Duration,
    pub max: Duration,
}

fn time_mode<F>(mode: &'static str, iterations: usize, mut run: F) -> Result<ModeTiming, WorldError>
where
    F: FnMut() -> Result<(), WorldError>,
{
    let mut window = SampleWindow::new(iterations);
    for _ in 0..iterations {
        window.time(&mut run)?;
    }
    let (min, max) = window.min_max();
    let timing = ModeTiming {
        mode,
        average: window.average(),
        min,
        max,
    };
    tracing::info!(
        mode,
        avg_ms = timing.average.as_secs_f64() * 1000.0,
        min_ms = timing.min.as_secs_f64() * 1000.0,
        max_ms = timing.max.as_secs_f64() * 1000.0,
        "mode timed"
    );
    Ok(timing)
}

/// Time every execution mode over the same updates.
pub fn compare_modes(
    world: &World,
    system: &TaskSystem,
    iterations: usize,
    batches_per_chunk: usize,
) -> Result<Vec<ModeTiming>, WorldError> {
    let mut timings = Vec::new();

    timings.push(time_mode("sequential", iterations, || {
        world.query::<(Position, Velocity)>()?.for_each(&integrate);
        Ok(())
    })?);

    timings.push(time_mode("execute", iterations, || {
        world
            .query::<(Position, Velocity)>()?
            .execute_parallel(system, integrate);
        Ok(())
    })?);

    timings.push(time_mode("schedule", iterations, || {
        let mut query = world.query::<(Position, Velocity)>()?;
        query.schedule_parallel(system, integrate).complete();
        Ok(())
    })?);

    timings.push(time_mode("schedule_batched", iterations, || {
        let mut query = world.query::<(Position, Velocity)>()?;
        query
            .schedule_parallel_batched(system, integrate, batches_per_chunk)
            .complete();
        Ok(())
    })?);

    timings.push(time_mode("combine", iterations, || {
        let mut movers = world.query::<(Position, Velocity)>()?;
        let mut vitals = world.query::<(Health, Mana)>()?;
        let mut spinners = world.query::<(Rotation,)>()?;
        let mut handles = [
            movers.schedule_parallel(system, integrate),
            vitals.schedule_parallel(system, regenerate),
            spinners.schedule_parallel(system, spin),
        ];
        system.combine(&mut handles).complete();
        Ok(())
    })?);

    timings.push(time_mode("handle_store", iterations, || {
        let mut movers = world.query::<(Position, Velocity)>()?;
        let mut vitals = world.query::<(Health, Mana)>()?;
        let mut spinners = world.query::<(Rotation,)>()?;
        let mut store = HandleStore::new();
        store.add(movers.schedule_parallel_batched(system, integrate, batches_per_chunk));
        store.add(vitals.schedule_parallel(system, regenerate));
        store.add(spinners.schedule_parallel(system, spin));
        store.complete_all();
        Ok(())
    })?);

    Ok(timings)
}

/// Two batches write disjoint value ranges one after the other; after the
/// second is disposed every entity must hold a value from it.
///
/// Returns an error describing the race if any entity does not.
pub fn verify_dispose(system: &TaskSystem, entity_count: usize, batches_per_chunk: usize) -> Result<()> {
    let count = entity_count.max(MIN_VERIFY_ENTITIES);
    let batches = batches_per_chunk.max(4);

    let mut world = World::new();
    world.spawn_many(count, |_| EntityBuilder::new().with(Health(0)))?;

    let mut query = world.query::<(Health,)>()?;
    query
        .schedule_parallel_batched(
            system,
            |health: &mut Health, entity: Entity| health.0 = 1000 + entity.id().raw() % 1000,
            batches,
        )
        .complete();
    query
        .schedule_parallel_batched(
            system,
            |health: &mut Health, entity: Entity| health.0 = 5000 + entity.id().raw() % 1000,
            batches,
        )
        .complete();

    let stale = Arc::new(AtomicUsize::new(0));
    let torn = Arc::new(AtomicUsize::new(0));
    let (stale_seen, torn_seen) = (Arc::clone(&stale), Arc::clone(&torn));
    query.for_each(&move |health: &mut Health, _: Entity| {
        if (1000..2000).contains(&health.0) {
            stale_seen.fetch_add(1, Ordering::Relaxed);
        } else if !(5000..6000).contains(&health.0) {
            torn_seen.fetch_add(1, Ordering::Relaxed);
        }
    });

    let (stale, torn) = (stale.load(Ordering::Relaxed), torn.load(Ordering::Relaxed));
    if stale > 0 || torn > 0 {
        bail!(
            "dispose returned before its work finished: {stale} stale and {torn} torn values across {count} entities"
        );
    }
    tracing::info!(entities = count, batches, "dispose verification passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_tasks::TaskSettings;

    fn system() -> TaskSystem {
        TaskSystem::new(&TaskSettings {
            worker_threads: 4,
            ..TaskSettings::default()
        })
        .expect("task system")
    }

    #[test]
    fn populate_spreads_entities_over_seven_archetypes() {
        let mut world = World::new();
        populate(&mut world, 700).expect("populate");
        assert_eq!(world.entity_count(), 700);
        assert_eq!(world.archetype_count(), ARCHETYPES);

        let movers = world.query::<(Position, Velocity)>().expect("query");
        assert_eq!(movers.entity_count(), 500);
    }

    #[test]
    fn every_mode_moves_entities_forward() {
        let system = system();
        let mut world = World::new();
        populate(&mut world, 1_400).expect("populate");

        let timings = compare_modes(&world, &system, 2, 4).expect("modes");
        let modes: Vec<_> = timings.iter().map(|t| t.mode).collect();
        assert_eq!(
            modes,
            vec![
                "sequential",
                "execute",
                "schedule",
                "schedule_batched",
                "combine",
                "handle_store"
            ]
        );

        // Six modes, two iterations each, every one integrating once.
        let first = world
            .resolve_entity(weft_core::ecs::EntityId::new(0))
            .expect("entity");
        let position = world.get::<Position>(first).expect("position");
        let expected = Vec3::new(1.0, 0.0, 0.5) * DT * 12.0;
        assert!((position.0 - expected).length() < 1e-4);

        let mage = world
            .resolve_entity(weft_core::ecs::EntityId::new(5))
            .expect("entity");
        assert_eq!(world.get::<Health>(mage).expect("health"), Health(54));
        assert_eq!(world.get::<Mana>(mage).expect("mana"), Mana(76));
    }

    #[test]
    fn dispose_verification_passes() {
        let system = system();
        verify_dispose(&system, 12_000, 4).expect("no race");
    }
}
