use crate::ecs::{Archetype, Component, ComponentId};
use std::fmt;

use super::chunk::{ColumnStorage, TypedColumn};

/// A component value waiting to be moved into a chunk column.
pub(crate) trait ComponentValue: Send {
    fn component_id(&self) -> ComponentId;

    /// Create an empty column able to hold values of this type.
    fn new_column(&self, capacity: usize) -> Box<dyn ColumnStorage>;

    /// Whether `column` stores values of this type.
    fn fits(&self, column: &dyn ColumnStorage) -> bool;

    fn push_into(self: Box<Self>, column: &mut dyn ColumnStorage);
}

impl<T: Component> ComponentValue for T {
    fn component_id(&self) -> ComponentId {
        T::ID
    }

    fn new_column(&self, capacity: usize) -> Box<dyn ColumnStorage> {
        Box::new(TypedColumn::<T>::with_capacity(capacity))
    }

    fn fits(&self, column: &dyn ColumnStorage) -> bool {
        column.as_any().is::<TypedColumn<T>>()
    }

    fn push_into(self: Box<Self>, column: &mut dyn ColumnStorage) {
        if let Some(column) = column.as_any_mut().downcast_mut::<TypedColumn<T>>() {
            column.push(*self);
        }
    }
}

/// Builder for constructing an entity's component set prior to spawning.
///
/// Adding the same component twice keeps the last value.
#[derive(Default)]
pub struct EntityBuilder {
    components: Vec<Box<dyn ComponentValue>>,
}

impl EntityBuilder {
    /// Create a new empty builder.
    pub fn new() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Add a Rust-typed component by value.
    pub fn with<T: Component>(mut self, value: T) -> Self {
        T::ensure_registered();
        self.components.retain(|c| c.component_id() != T::ID);
        self.components.push(Box::new(value));
        self
    }

    /// Archetype the built entity will live in.
    pub fn archetype(&self) -> Archetype {
        Archetype::from_components(self.component_ids())
    }

    pub fn component_ids(&self) -> Vec<ComponentId> {
        self.components.iter().map(|c| c.component_id()).collect()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub(crate) fn into_components(self) -> Vec<Box<dyn ComponentValue>> {
        self.components
    }
}

impl fmt::Debug for EntityBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityBuilder")
            .field("components", &self.component_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug)]
    struct Spin(#[allow(dead_code)] i32);
    crate::define_component!(Spin, 110, "Spin");

    #[derive(Clone, Copy, Debug)]
    struct Charge(#[allow(dead_code)] i32);
    crate::define_component!(Charge, 111, "Charge");

    #[test]
    fn repeated_components_keep_one_entry() {
        let builder = EntityBuilder::new().with(Spin(1)).with(Charge(2)).with(Spin(3));
        assert_eq!(builder.len(), 2);

        let archetype = builder.archetype();
        assert_eq!(archetype.components, vec![Spin::ID, Charge::ID]);
    }

    #[test]
    fn archetype_is_order_independent() {
        let a = EntityBuilder::new().with(Spin(0)).with(Charge(0)).archetype();
        let b = EntityBuilder::new().with(Charge(0)).with(Spin(0)).archetype();
        assert_eq!(a.id, b.id);
    }
}
