// chunk.rs - Fixed-capacity SoA block of one archetype
//
// A chunk owns one typed column per component plus the entity id of every
// row. All columns and the id array always have the same length. Columns
// sit behind an UnsafeCell so a query can hand raw row pointers to worker
// threads while the chunk itself is shared through an `Arc`.

use crate::ecs::{ArchetypeId, Component, ComponentId, EntityId, WorldError};
use std::any::Any;
use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::ptr::NonNull;

use super::builder::ComponentValue;

/// Type-erased column owned by a chunk.
pub(crate) trait ColumnStorage: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Column holding values of a single component type.
pub(crate) struct TypedColumn<T> {
    values: UnsafeCell<Vec<T>>,
}

// SAFETY: shared access to the column only ever produces element pointers.
// Element writes through those pointers are confined to disjoint rows by the
// work planner and to one query at a time by the component access lease.
unsafe impl<T: Send + Sync> Sync for TypedColumn<T> {}

impl<T: Component> TypedColumn<T> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            values: UnsafeCell::new(Vec::with_capacity(capacity)),
        }
    }

    pub(crate) fn push(&mut self, value: T) {
        self.values.get_mut().push(value);
    }

    fn values_mut(&mut self) -> &mut [T] {
        self.values.get_mut().as_mut_slice()
    }

    fn base_ptr(&self) -> Option<ColumnPtr<T>> {
        // SAFETY: only the vector's buffer pointer is read; the vector itself
        // is never resized while the chunk is shared.
        let ptr = unsafe { (*self.values.get()).as_mut_ptr() };
        NonNull::new(ptr).map(ColumnPtr)
    }
}

impl<T: Component> ColumnStorage for TypedColumn<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Raw pointer to the first row of a component column.
///
/// Handed to worker threads by query runners; dereferencing it is only
/// sound for rows the caller has exclusive access to.
pub struct ColumnPtr<T>(NonNull<T>);

impl<T> Clone for ColumnPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ColumnPtr<T> {}

// SAFETY: the pointer targets `Send + Sync` component data; aliasing rules are
// upheld by the callers of `row_mut`.
unsafe impl<T: Send + Sync> Send for ColumnPtr<T> {}
unsafe impl<T: Send + Sync> Sync for ColumnPtr<T> {}

impl<T> ColumnPtr<T> {
    /// Mutable reference to `row`.
    ///
    /// # Safety
    /// `row` must be below the chunk length, and no other reference to the
    /// same row may be live for `'a`.
    #[inline]
    pub unsafe fn row_mut<'a>(self, row: usize) -> &'a mut T {
        &mut *self.0.as_ptr().add(row)
    }
}

/// Storage for up to `capacity` entities of one archetype.
pub struct Chunk {
    archetype: ArchetypeId,
    index: u32,
    capacity: usize,
    ids: Vec<EntityId>,
    columns: HashMap<ComponentId, Box<dyn ColumnStorage>>,
}

impl Chunk {
    pub(crate) fn new(archetype: ArchetypeId, index: u32, capacity: usize) -> Self {
        Self {
            archetype,
            index,
            capacity,
            ids: Vec::with_capacity(capacity),
            columns: HashMap::new(),
        }
    }

    #[inline]
    pub fn archetype(&self) -> ArchetypeId {
        self.archetype
    }

    /// Position of this chunk within its archetype.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.ids.len() >= self.capacity
    }

    /// Entity id of every row.
    #[inline]
    pub fn ids(&self) -> &[EntityId] {
        &self.ids
    }

    pub fn has_component(&self, id: ComponentId) -> bool {
        self.columns.contains_key(&id)
    }

    /// Row pointer for component `T`, if this chunk stores it.
    pub fn column_ptr<T: Component>(&self) -> Option<ColumnPtr<T>> {
        self.columns
            .get(&T::ID)?
            .as_any()
            .downcast_ref::<TypedColumn<T>>()?
            .base_ptr()
    }

    /// Exclusive access to a whole column.
    pub fn column_mut<T: Component>(&mut self) -> Option<&mut [T]> {
        let column = self
            .columns
            .get_mut(&T::ID)?
            .as_any_mut()
            .downcast_mut::<TypedColumn<T>>()?;
        Some(column.values_mut())
    }

    /// Shared reference to one value.
    ///
    /// # Safety
    /// No work item may be writing component `T` of this chunk while the
    /// returned reference is live (the caller holds a lease on `T`).
    pub(crate) unsafe fn value<T: Component>(&self, row: usize) -> Option<&T> {
        if row >= self.len() {
            return None;
        }
        let ptr = self.column_ptr::<T>()?;
        Some(&*ptr.0.as_ptr().add(row))
    }

    /// Append one entity. All columns grow together or not at all.
    pub(crate) fn push_row(
        &mut self,
        id: EntityId,
        components: Vec<Box<dyn ComponentValue>>,
    ) -> Result<u32, WorldError> {
        debug_assert!(!self.is_full(), "push into a full chunk");

        let capacity = self.capacity;
        for value in &components {
            let column = self
                .columns
                .entry(value.component_id())
                .or_insert_with(|| value.new_column(capacity));
            if !value.fits(&**column) {
                return Err(WorldError::ColumnTypeMismatch {
                    component: value.component_id(),
                    archetype: self.archetype,
                });
            }
        }

        for value in components {
            if let Some(column) = self.columns.get_mut(&value.component_id()) {
                value.push_into(&mut **column);
            }
        }

        let row = self.ids.len() as u32;
        self.ids.push(id);
        Ok(row)
    }
}
