// archetype.rs - Component-set identity
//
// Two entities share an archetype exactly when they carry the same set of
// components, regardless of the order the builder saw them in.

use crate::ecs::ComponentId;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub type ArchetypeId = u64;

/// A normalised component set and the id derived from it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Archetype {
    pub id: ArchetypeId,
    /// Ascending, without repeats.
    pub components: Vec<ComponentId>,
}

impl Archetype {
    /// Normalise `ids` (sort, drop repeats) and derive the archetype id.
    pub fn from_components(mut ids: Vec<ComponentId>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        Self {
            id: set_id(&ids),
            components: ids,
        }
    }

    pub fn contains(&self, id: ComponentId) -> bool {
        self.components.binary_search(&id).is_ok()
    }

    /// Whether every id in `ids` is part of this set. An empty list matches.
    pub fn contains_all(&self, ids: &[ComponentId]) -> bool {
        ids.iter().all(|&id| self.contains(id))
    }
}

fn set_id(sorted: &[ComponentId]) -> ArchetypeId {
    let mut hasher = DefaultHasher::new();
    sorted.hash(&mut hasher);
    hasher.finish()
}
