// parallel.rs - Execution modes on queries
//
// All three modes share the planner and the runner and differ only in how
// the work items reach the backend. A single work item always runs inline
// on the calling thread.

use crate::backend::WorkDescriptor;
use crate::handle::JobHandle;
use crate::planner::WorkItem;
use crate::runner::QueryRunner;
use crate::system::{
    TaskSystem, BATCHES_EXECUTED, BATCHES_FALLBACK, BATCHES_INLINE, BATCHES_SCHEDULED,
};
use std::sync::Arc;
use weft_core::ecs::{ChunkView, Component, Entity, Query, QueryShape};

fn plan<S: QueryShape>(
    query: &Query<'_, S>,
    system: &TaskSystem,
    batches_per_chunk: usize,
) -> Vec<WorkItem> {
    query.assert_idle();
    let lengths: Vec<usize> = query.chunks().iter().map(ChunkView::len).collect();
    system.planner().plan(&lengths, batches_per_chunk)
}

/// Run one work item per chunk and block until all are done.
pub(crate) fn execute_query<S: QueryShape>(
    query: &mut Query<'_, S>,
    system: &TaskSystem,
    callback: Box<S::Callback>,
) {
    let items = plan(query, system, 1);
    let count = items.len();
    if count == 0 {
        return;
    }

    let runner = QueryRunner::from_query(query, items, callback);
    if count == 1 {
        system.metrics().record(BATCHES_INLINE, 1);
        runner.execute(0);
        return;
    }

    tracing::trace!(items = count, "executing batch");
    system
        .metrics()
        .time_execute(|| system.backend().execute_batch(&runner, count));
    system.metrics().record(BATCHES_EXECUTED, 1);
}

/// Schedule the query's work items and return a handle to them.
///
/// `batches_per_chunk <= 1` schedules one item per chunk.
pub(crate) fn schedule_query<'q, S: QueryShape>(
    query: &'q mut Query<'_, S>,
    system: &TaskSystem,
    callback: Box<S::Callback>,
    batches_per_chunk: usize,
) -> JobHandle<'q> {
    let items = plan(query, system, batches_per_chunk);
    let count = items.len();
    if count == 0 {
        return JobHandle::completed();
    }

    let runner = QueryRunner::from_query(query, items, callback);
    if count == 1 {
        system.metrics().record(BATCHES_INLINE, 1);
        runner.execute(0);
        return JobHandle::completed();
    }

    let work: Arc<dyn WorkDescriptor> = Arc::new(runner);
    let backend = Arc::clone(system.backend());
    let token = backend.schedule_batch(Arc::clone(&work), count);
    if token.is_empty() {
        tracing::warn!(
            items = count,
            backend = backend.name(),
            "batch could not be scheduled; running it inline"
        );
        for index in 0..count {
            work.execute_task(index);
        }
        system.metrics().record(BATCHES_FALLBACK, 1);
        return JobHandle::completed();
    }

    system.metrics().record(BATCHES_SCHEDULED, 1);
    tracing::trace!(%token, items = count, "batch scheduled");
    JobHandle::pending(backend, token, vec![work])
}

macro_rules! parallel_query {
    ($(#[$doc:meta])* $trait_name:ident; $($name:ident),+) => {
        $(#[$doc])*
        pub trait $trait_name<$($name: Component),+> {
            /// Run the callback for every entity, one work item per chunk,
            /// and return once all of them are done.
            fn execute_parallel<F>(&mut self, system: &TaskSystem, callback: F)
            where
                F: Fn($(&mut $name,)+ Entity) + Send + Sync + 'static;

            /// Schedule one work item per chunk.
            fn schedule_parallel<F>(&mut self, system: &TaskSystem, callback: F) -> JobHandle<'_>
            where
                F: Fn($(&mut $name,)+ Entity) + Send + Sync + 'static;

            /// Schedule up to `batches_per_chunk` slices per chunk.
            fn schedule_parallel_batched<F>(
                &mut self,
                system: &TaskSystem,
                callback: F,
                batches_per_chunk: usize,
            ) -> JobHandle<'_>
            where
                F: Fn($(&mut $name,)+ Entity) + Send + Sync + 'static;
        }

        impl<'w, $($name: Component),+> $trait_name<$($name),+> for Query<'w, ($($name,)+)> {
            fn execute_parallel<F>(&mut self, system: &TaskSystem, callback: F)
            where
                F: Fn($(&mut $name,)+ Entity) + Send + Sync + 'static,
            {
                let callback: Box<dyn Fn($(&mut $name,)+ Entity) + Send + Sync> = Box::new(callback);
                execute_query(self, system, callback);
            }

            fn schedule_parallel<F>(&mut self, system: &TaskSystem, callback: F) -> JobHandle<'_>
            where
                F: Fn($(&mut $name,)+ Entity) + Send + Sync + 'static,
            {
                let callback: Box<dyn Fn($(&mut $name,)+ Entity) + Send + Sync> = Box::new(callback);
                schedule_query(self, system, callback, 1)
            }

            fn schedule_parallel_batched<F>(
                &mut self,
                system: &TaskSystem,
                callback: F,
                batches_per_chunk: usize,
            ) -> JobHandle<'_>
            where
                F: Fn($(&mut $name,)+ Entity) + Send + Sync + 'static,
            {
                let callback: Box<dyn Fn($(&mut $name,)+ Entity) + Send + Sync> = Box::new(callback);
                schedule_query(self, system, callback, batches_per_chunk)
            }
        }
    };
}

parallel_query!(
    /// Parallel execution for single-component queries.
    ParallelQuery1; A
);
parallel_query!(
    /// Parallel execution for two-component queries.
    ParallelQuery2; A, B
);
parallel_query!(
    /// Parallel execution for three-component queries.
    ParallelQuery3; A, B, C
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::HandleState;
    use crate::settings::TaskSettings;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use weft_core::ecs::{EntityBuilder, EntityId, World, WorldConfig};

    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    struct Health(u32);
    weft_core::define_component!(Health, 500, "Health");

    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    struct Mana(u32);
    weft_core::define_component!(Mana, 501, "Mana");

    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    struct Tick(u64);
    weft_core::define_component!(Tick, 502, "Tick");

    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    struct Absent(u8);
    weft_core::define_component!(Absent, 503, "Absent");

    fn system(max_in_flight: usize) -> TaskSystem {
        TaskSystem::new(&TaskSettings {
            worker_threads: 4,
            max_in_flight_batches: max_in_flight,
            ..TaskSettings::default()
        })
        .expect("task system")
    }

    fn world(count: usize, capacity: usize) -> World {
        let mut world = World::with_config(WorldConfig {
            chunk_capacity: capacity,
        })
        .expect("config");
        world
            .spawn_many(count, |i| {
                EntityBuilder::new()
                    .with(Health(0))
                    .with(Mana(0))
                    .with(Tick(i as u64))
            })
            .expect("spawn");
        world
    }

    fn healths(world: &World, count: usize) -> Vec<u32> {
        (0..count as u32)
            .map(|id| {
                let entity = world.resolve_entity(EntityId::new(id)).expect("entity");
                world.get::<Health>(entity).expect("health").0
            })
            .collect()
    }

    fn ticks_sum(world: &World, count: usize) -> u64 {
        (0..count as u32)
            .map(|id| {
                let entity = world.resolve_entity(EntityId::new(id)).expect("entity");
                world.get::<Tick>(entity).expect("tick").0
            })
            .sum()
    }

    fn seed(health: &mut Health, tick: &mut Tick, entity: Entity) {
        health.0 = (tick.0 as u32) * 3 + entity.id().raw();
    }

    #[test]
    fn single_item_modes_match_a_sequential_loop() {
        let system = system(64);
        let worlds: Vec<World> = (0..3).map(|_| world(100, 1024)).collect();

        {
            let mut query = worlds[0].query::<(Health, Tick)>().expect("query");
            query.for_each(&seed);
        }
        {
            let mut query = worlds[1].query::<(Health, Tick)>().expect("query");
            query.execute_parallel(&system, seed);
        }
        {
            let mut query = worlds[2].query::<(Health, Tick)>().expect("query");
            let handle = query.schedule_parallel(&system, seed);
            // One chunk runs inline.
            assert!(handle.is_trivial());
            handle.complete();
        }

        let expected = healths(&worlds[0], 100);
        assert_eq!(expected[10], 40);
        assert_eq!(healths(&worlds[1], 100), expected);
        assert_eq!(healths(&worlds[2], 100), expected);
    }

    #[test]
    fn dispose_waits_before_the_next_batch_starts() {
        const COUNT: usize = 12_000;
        let system = system(64);
        let world = world(COUNT, 16 * 1024);
        let violations = Arc::new(AtomicUsize::new(0));

        let mut query = world.query::<(Health,)>().expect("query");
        for round in 0..5 {
            let seen = Arc::clone(&violations);
            let mut first = query.schedule_parallel_batched(
                &system,
                move |health: &mut Health, entity: Entity| {
                    let ok = if round == 0 {
                        health.0 == 0
                    } else {
                        (5000..6000).contains(&health.0)
                    };
                    if !ok {
                        seen.fetch_add(1, Ordering::Relaxed);
                    }
                    health.0 = 1000 + entity.id().raw() % 1000;
                },
                4,
            );
            assert_eq!(first.state(), HandleState::Pending);
            first.dispose();
            drop(first);

            let seen = Arc::clone(&violations);
            let second = query.schedule_parallel_batched(
                &system,
                move |health: &mut Health, entity: Entity| {
                    if !(1000..2000).contains(&health.0) {
                        seen.fetch_add(1, Ordering::Relaxed);
                    }
                    health.0 = 5000 + entity.id().raw() % 1000;
                },
                4,
            );
            second.complete();
        }
        drop(query);

        assert_eq!(violations.load(Ordering::Relaxed), 0);
        assert!(healths(&world, COUNT)
            .iter()
            .all(|h| (5000..6000).contains(h)));
    }

    #[test]
    fn combined_handle_covers_disjoint_queries() {
        const COUNT: usize = 2_000;
        let system = system(64);
        let world = world(COUNT, 256);

        let mut health = world.query::<(Health,)>().expect("health query");
        let mut mana = world.query::<(Mana, Tick)>().expect("mana query");
        let mut handles = [
            health.schedule_parallel(&system, |h: &mut Health, _: Entity| h.0 = 7),
            mana.schedule_parallel(&system, |m: &mut Mana, t: &mut Tick, _: Entity| {
                m.0 = t.0 as u32 + 1
            }),
        ];
        let combined = system.combine(&mut handles);
        assert!(handles.iter().all(|h| h.state() == HandleState::Detached));
        combined.complete();
        drop(handles);
        drop(health);
        drop(mana);

        assert!(healths(&world, COUNT).iter().all(|&h| h == 7));
        for id in [0u32, 999, 1999] {
            let entity = world.resolve_entity(EntityId::new(id)).expect("entity");
            assert_eq!(world.get::<Mana>(entity).expect("mana"), Mana(id + 1));
        }
    }

    #[test]
    fn parallel_increments_add_up_like_sequential_ones() {
        const COUNT: usize = 5_000;
        let system = system(64);
        let world = world(COUNT, 256);
        let base = ticks_sum(&world, COUNT);

        let mut query = world.query::<(Tick,)>().expect("query");
        for _ in 0..3 {
            query.execute_parallel(&system, |t: &mut Tick, _: Entity| t.0 += 1);
        }
        for _ in 0..3 {
            query
                .schedule_parallel(&system, |t: &mut Tick, _: Entity| t.0 += 1)
                .complete();
        }
        query
            .schedule_parallel_batched(&system, |t: &mut Tick, _: Entity| t.0 += 2, 8)
            .complete();
        drop(query);

        assert_eq!(ticks_sum(&world, COUNT), base + 8 * COUNT as u64);
    }

    #[test]
    fn failed_scheduling_runs_inline_and_keeps_writes() {
        let system = system(0);
        let world = world(1_000, 128);

        let mut query = world.query::<(Health, Mana, Tick)>().expect("query");
        let handle = query.schedule_parallel(
            &system,
            |h: &mut Health, m: &mut Mana, t: &mut Tick, _: Entity| {
                h.0 = 1;
                m.0 = 2;
                t.0 = 3;
            },
        );
        assert!(handle.is_trivial());
        assert!(handle.is_completed());
        drop(handle);
        drop(query);

        assert!(healths(&world, 1_000).iter().all(|&h| h == 1));
        if weft_metrics::ENABLED {
            assert_eq!(system.metrics().get(BATCHES_FALLBACK), 1);
        }
    }

    #[test]
    fn queries_without_chunks_are_no_ops() {
        let system = system(64);
        let world = world(10, 16);
        let mut query = world.query::<(Absent,)>().expect("query");
        assert_eq!(query.chunk_count(), 0);

        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        query.execute_parallel(&system, move |_: &mut Absent, _: Entity| {
            counted.fetch_add(1, Ordering::Relaxed);
        });
        let handle = query.schedule_parallel_batched(&system, |_: &mut Absent, _: Entity| {}, 4);
        assert!(handle.is_trivial());
        assert_eq!(handle.state(), HandleState::Completed);
        drop(handle);
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn structural_writes_wait_for_scheduled_work() {
        let system = system(64);
        let mut world = world(600, 256);
        let target = world.resolve_entity(EntityId::new(0)).expect("entity");

        {
            let mut query = world.query::<(Health,)>().expect("query");
            let handle = query.schedule_parallel(&system, |h: &mut Health, _: Entity| h.0 += 1);
            handle.complete();
        }
        // Every runner clone is gone once the handle is disposed.
        *world.get_mut::<Health>(target).expect("health") = Health(99);
        assert_eq!(world.get::<Health>(target).expect("health"), Health(99));
        world
            .spawn(EntityBuilder::new().with(Health(0)).with(Mana(0)).with(Tick(0)))
            .expect("spawn after dispose");
    }

    #[test]
    #[should_panic(expected = "was a job handle leaked")]
    fn leaked_handles_block_rescheduling() {
        let system = system(64);
        let world = world(1_000, 128);
        let mut query = world.query::<(Health,)>().expect("query");
        let handle = query.schedule_parallel(&system, |h: &mut Health, _: Entity| h.0 += 1);
        std::mem::forget(handle);
        let _ = query.schedule_parallel(&system, |h: &mut Health, _: Entity| h.0 += 1);
    }
}
