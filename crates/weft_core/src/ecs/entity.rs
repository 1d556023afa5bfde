//! Entity identifiers and the directory that resolves them.
//!
//! Ids are dense: the n-th spawned entity gets id n. Chunks store ids only;
//! the directory turns an id back into a full handle carrying the entity's
//! location. Worker threads share the directory read-only through an `Arc`,
//! and spawning copies it on write if any work still holds the old one.

use crate::ecs::ArchetypeId;
use std::fmt;

/// Dense entity identifier, stored per row in every chunk.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(u32);

impl EntityId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entity handle handed to query callbacks.
///
/// Entities never move between chunks, so the location recorded at spawn
/// stays valid for the entity's lifetime.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Entity {
    id: EntityId,
    archetype: ArchetypeId,
    chunk: u32,
    row: u32,
}

impl Entity {
    pub(crate) const fn new(id: EntityId, archetype: ArchetypeId, chunk: u32, row: u32) -> Self {
        Self {
            id,
            archetype,
            chunk,
            row,
        }
    }

    #[inline]
    pub fn id(&self) -> EntityId {
        self.id
    }

    #[inline]
    pub fn archetype(&self) -> ArchetypeId {
        self.archetype
    }

    /// Index of the chunk within its archetype.
    #[inline]
    pub fn chunk(&self) -> u32 {
        self.chunk
    }

    /// Row within the chunk.
    #[inline]
    pub fn row(&self) -> u32 {
        self.row
    }
}

/// Id → entity lookup shared with worker threads.
#[derive(Debug, Clone, Default)]
pub struct EntityDirectory {
    entries: Vec<Entity>,
}

impl EntityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve an id to its entity handle.
    #[inline]
    pub fn get(&self, id: EntityId) -> Option<Entity> {
        self.entries.get(id.index()).copied()
    }

    /// Id the next pushed entity will receive.
    pub fn next_id(&self) -> EntityId {
        EntityId::new(self.entries.len() as u32)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn push(&mut self, entity: Entity) {
        debug_assert_eq!(entity.id(), self.next_id(), "entity ids must stay dense");
        self.entries.push(entity);
    }
}
