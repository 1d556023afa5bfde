// query.rs - Chunk views for a closed set of tuple shapes
//
// A query resolves, once, every chunk whose archetype carries all of the
// shape's components, and binds the column pointers the callback needs.
// The task layer slices those views into work items; `for_each` is the
// sequential path over the same data.

use crate::ecs::{
    name_of, AccessLease, Chunk, ColumnPtr, Component, ComponentId, Entity, EntityDirectory,
    EntityId, World, WorldError,
};
use std::marker::PhantomData;
use std::sync::Arc;

mod sealed {
    pub trait Sealed {}
}

/// A tuple of components a query iterates over.
///
/// Implemented for `(A,)`, `(A, B)` and `(A, B, C)` only. Each component is
/// handed to the callback by `&mut`, followed by the row's entity.
///
/// The trait is sealed: the lease a query takes covers `component_ids()`,
/// and workers rely on `bind` resolving exactly those columns.
///
/// ```compile_fail
/// use weft_core::ecs::{Chunk, ComponentId, Entity, QueryShape};
///
/// struct Loose;
///
/// impl QueryShape for Loose {
///     const ARITY: usize = 0;
///     type Columns = ();
///     type Callback = dyn Fn(Entity) + Send + Sync;
///     fn component_ids() -> Vec<ComponentId> { Vec::new() }
///     fn bind(_: &Chunk) -> Option<()> { Some(()) }
///     unsafe fn invoke(_: (), _: usize, entity: Entity, callback: &Self::Callback) {
///         callback(entity)
///     }
/// }
/// ```
pub trait QueryShape: sealed::Sealed + Sized + 'static {
    /// Number of components in the shape.
    const ARITY: usize;

    /// Bound column pointers, one per component.
    type Columns: Copy + Send + Sync + 'static;

    /// Callback signature, e.g. `dyn Fn(&mut A, &mut B, Entity)`.
    type Callback: ?Sized + Send + Sync + 'static;

    fn component_ids() -> Vec<ComponentId>;

    /// Resolve this shape's columns in `chunk`.
    fn bind(chunk: &Chunk) -> Option<Self::Columns>;

    /// Call `callback` for one row.
    ///
    /// # Safety
    /// `row` must be below the length of the chunk `columns` were bound
    /// from, that chunk must still be alive, and no other reference to this
    /// row's components may be live during the call.
    unsafe fn invoke(columns: Self::Columns, row: usize, entity: Entity, callback: &Self::Callback);
}

macro_rules! impl_query_shape {
    ($arity:expr; $($name:ident),+) => {
        impl<$($name: Component),+> sealed::Sealed for ($($name,)+) {}

        impl<$($name: Component),+> QueryShape for ($($name,)+) {
            const ARITY: usize = $arity;
            type Columns = ($(ColumnPtr<$name>,)+);
            type Callback = dyn Fn($(&mut $name,)+ Entity) + Send + Sync;

            fn component_ids() -> Vec<ComponentId> {
                vec![$($name::ID),+]
            }

            #[allow(non_snake_case)]
            fn bind(chunk: &Chunk) -> Option<Self::Columns> {
                $(let $name = chunk.column_ptr::<$name>()?;)+
                Some(($($name,)+))
            }

            #[allow(non_snake_case)]
            #[inline]
            unsafe fn invoke(
                columns: Self::Columns,
                row: usize,
                entity: Entity,
                callback: &Self::Callback,
            ) {
                let ($($name,)+) = columns;
                callback($($name.row_mut(row),)+ entity);
            }
        }
    };
}

impl_query_shape!(1; A);
impl_query_shape!(2; A, B);
impl_query_shape!(3; A, B, C);

/// One chunk plus the columns bound for shape `S`.
///
/// Holding a view keeps the chunk's memory alive.
pub struct ChunkView<S: QueryShape> {
    chunk: Arc<Chunk>,
    columns: S::Columns,
}

impl<S: QueryShape> Clone for ChunkView<S> {
    fn clone(&self) -> Self {
        Self {
            chunk: Arc::clone(&self.chunk),
            columns: self.columns,
        }
    }
}

impl<S: QueryShape> ChunkView<S> {
    #[inline]
    pub fn len(&self) -> usize {
        self.chunk.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunk.is_empty()
    }

    #[inline]
    pub fn ids(&self) -> &[EntityId] {
        self.chunk.ids()
    }

    #[inline]
    pub fn columns(&self) -> S::Columns {
        self.columns
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }
}

/// Iteration over every entity carrying all components of `S`.
///
/// The query holds an exclusive lease on its components until it and every
/// piece of work built from it are gone.
pub struct Query<'w, S: QueryShape> {
    chunks: Vec<ChunkView<S>>,
    directory: Arc<EntityDirectory>,
    lease: Arc<AccessLease>,
    _world: PhantomData<&'w World>,
}

impl<'w, S: QueryShape> Query<'w, S> {
    pub(crate) fn new(world: &'w World) -> Result<Self, WorldError> {
        let ids = S::component_ids();
        for (i, id) in ids.iter().enumerate() {
            assert!(
                !ids[..i].contains(id),
                "query shape lists component {} more than once",
                name_of(*id)
            );
        }

        let lease = world.access().lease(&ids)?;

        let mut chunks = Vec::new();
        for archetype in world.archetypes_with_all(&ids) {
            for chunk in world.chunks_of(archetype) {
                if let Some(columns) = S::bind(chunk) {
                    chunks.push(ChunkView {
                        chunk: Arc::clone(chunk),
                        columns,
                    });
                }
            }
        }

        tracing::trace!(
            components = ?ids,
            chunks = chunks.len(),
            "query resolved"
        );

        Ok(Self {
            chunks,
            directory: world.directory(),
            lease: Arc::new(lease),
            _world: PhantomData,
        })
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunks(&self) -> &[ChunkView<S>] {
        &self.chunks
    }

    /// Total number of matching entities.
    pub fn entity_count(&self) -> usize {
        self.chunks.iter().map(ChunkView::len).sum()
    }

    pub fn resolve_entity(&self, id: EntityId) -> Option<Entity> {
        self.directory.get(id)
    }

    pub fn directory(&self) -> &Arc<EntityDirectory> {
        &self.directory
    }

    pub fn lease(&self) -> &Arc<AccessLease> {
        &self.lease
    }

    /// Whether any work built from this query still holds its data.
    pub fn has_work_in_flight(&self) -> bool {
        Arc::strong_count(&self.lease) > 1
    }

    /// Panics if work built from this query is still alive.
    ///
    /// Job handles borrow the query, so this only trips when a handle was
    /// leaked instead of disposed.
    pub fn assert_idle(&self) {
        assert!(
            !self.has_work_in_flight(),
            "query still has work in flight; was a job handle leaked?"
        );
    }

    /// Run `callback` for every matching entity on the calling thread.
    pub fn for_each(&mut self, callback: &S::Callback) {
        self.assert_idle();
        for view in &self.chunks {
            for (row, id) in view.ids().iter().enumerate() {
                let Some(entity) = self.directory.get(*id) else {
                    continue;
                };
                // SAFETY: `row < len`, the view keeps the chunk alive, and
                // `&mut self` plus the idle check rule out any other writer.
                unsafe { S::invoke(view.columns, row, entity, callback) };
            }
        }
    }
}
