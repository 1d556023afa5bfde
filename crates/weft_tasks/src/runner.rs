//! Executes one work item of a query by index.

use crate::backend::WorkDescriptor;
use crate::planner::WorkItem;
use std::sync::Arc;
use weft_core::ecs::{AccessLease, ChunkView, EntityDirectory, Query, QueryShape};

/// Everything one execution of a query needs on a worker thread.
///
/// The runner keeps the query's chunks, entity directory and component
/// lease alive until the last holder drops it, so in-flight items never
/// touch freed or re-leased data.
pub struct QueryRunner<S: QueryShape> {
    items: Vec<WorkItem>,
    chunks: Vec<ChunkView<S>>,
    directory: Arc<EntityDirectory>,
    callback: Box<S::Callback>,
    _lease: Arc<AccessLease>,
}

impl<S: QueryShape> QueryRunner<S> {
    /// `items` must come from the slice planner over `query`'s chunks: in
    /// bounds and pairwise disjoint.
    pub(crate) fn from_query(
        query: &Query<'_, S>,
        items: Vec<WorkItem>,
        callback: Box<S::Callback>,
    ) -> Self {
        Self {
            items,
            chunks: query.chunks().to_vec(),
            directory: Arc::clone(query.directory()),
            callback,
            _lease: Arc::clone(query.lease()),
        }
    }

    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    /// Run the callback over item `task_index`, rows in increasing order.
    pub fn execute(&self, task_index: usize) {
        let Some(item) = self.items.get(task_index) else {
            return;
        };
        let Some(view) = self.chunks.get(item.chunk) else {
            return;
        };
        debug_assert!(item.end() <= view.len(), "work item past chunk end");

        let end = item.end().min(view.len());
        let columns = view.columns();
        let ids = view.ids();
        for row in item.start..end {
            let Some(entity) = self.directory.get(ids[row]) else {
                debug_assert!(false, "entity {} missing from directory", ids[row]);
                continue;
            };
            // SAFETY: items are disjoint row ranges within bounds, so this
            // row is touched by this call alone. The view keeps the chunk
            // alive and the lease keeps other queries off these columns.
            unsafe { S::invoke(columns, row, entity, &*self.callback) };
        }
    }
}

impl<S: QueryShape> WorkDescriptor for QueryRunner<S> {
    fn task_count(&self) -> usize {
        self.items.len()
    }

    fn execute_task(&self, index: usize) {
        self.execute(index);
    }

    fn label(&self) -> &str {
        std::any::type_name::<S>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::SlicePlanner;
    use std::sync::Mutex;
    use weft_core::ecs::{Entity, EntityBuilder, World, WorldConfig};

    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    struct Step(u32);
    weft_core::define_component!(Step, 200, "Step");

    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    struct Weight(u32);
    weft_core::define_component!(Weight, 201, "Weight");

    fn world(count: usize, capacity: usize) -> World {
        let mut world = World::with_config(WorldConfig {
            chunk_capacity: capacity,
        })
        .expect("config");
        world
            .spawn_many(count, |i| {
                EntityBuilder::new()
                    .with(Step(0))
                    .with(Weight(i as u32))
            })
            .expect("spawn");
        world
    }

    fn lengths<S: QueryShape>(query: &Query<'_, S>) -> Vec<usize> {
        query.chunks().iter().map(ChunkView::len).collect()
    }

    #[test]
    fn each_item_touches_only_its_range_in_order() {
        let world = world(30, 16);
        let query = world.query::<(Step, Weight)>().expect("query");
        let items = SlicePlanner::new(4).plan(&lengths(&query), 3);
        // 16 rows -> 6, 6, 4; 14 rows -> 5, 5, 4.
        assert_eq!(items.len(), 6);

        let visited = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&visited);
        let runner = QueryRunner::from_query(
            &query,
            items,
            Box::new(move |step: &mut Step, weight: &mut Weight, entity: Entity| {
                step.0 += 1;
                sink.lock().expect("sink").push((entity.id().raw(), weight.0));
            }),
        );

        runner.execute(1);
        let seen = visited.lock().expect("visited").clone();
        assert_eq!(seen, (6..12).map(|i| (i, i)).collect::<Vec<_>>());
    }

    #[test]
    fn out_of_range_index_is_a_no_op() {
        let world = world(5, 16);
        let query = world.query::<(Step,)>().expect("query");
        let items = SlicePlanner::default().per_chunk(&lengths(&query));
        let runner = QueryRunner::from_query(
            &query,
            items,
            Box::new(|step: &mut Step, _: Entity| step.0 += 1),
        );

        assert_eq!(runner.task_count(), 1);
        runner.execute_task(1);
        runner.execute_task(usize::MAX);
        drop(runner);
        drop(query);
        let first = world.resolve_entity(weft_core::ecs::EntityId::new(0)).expect("entity");
        assert_eq!(world.get::<Step>(first).expect("step"), Step(0));
    }

    #[test]
    fn running_every_item_visits_every_entity_once() {
        let world = world(50, 16);
        let query = world.query::<(Step,)>().expect("query");
        let items = SlicePlanner::new(1).plan(&lengths(&query), 4);
        let runner = QueryRunner::from_query(
            &query,
            items,
            Box::new(|step: &mut Step, _: Entity| step.0 += 1),
        );
        for index in 0..runner.task_count() {
            runner.execute_task(index);
        }
        drop(runner);
        drop(query);

        for id in 0..50 {
            let entity = world
                .resolve_entity(weft_core::ecs::EntityId::new(id))
                .expect("entity");
            assert_eq!(world.get::<Step>(entity).expect("step"), Step(1));
        }
    }

    #[test]
    fn runner_holds_the_query_lease() {
        let world = world(3, 16);
        let query = world.query::<(Weight,)>().expect("query");
        let runner = QueryRunner::from_query(
            &query,
            Vec::new(),
            Box::new(|_: &mut Weight, _: Entity| {}),
        );
        drop(query);
        assert!(world.query::<(Weight,)>().is_err());
        drop(runner);
        assert!(world.query::<(Weight,)>().is_ok());
    }
}
