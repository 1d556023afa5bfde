// world.rs - ECS World with chunked archetype storage

use crate::ecs::{
    name_of, Archetype, ArchetypeId, Chunk, ComponentAccess, Component, ComponentId, Entity,
    EntityBuilder, EntityDirectory, EntityId, Query, QueryShape,
};
use serde::{Deserialize, Serialize};
use std::collections::{hash_map::Entry, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// Default number of entities per chunk.
pub const DEFAULT_CHUNK_CAPACITY: usize = 16 * 1024;

/// Storage tuning for a [`World`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Maximum entities stored in one chunk.
    pub chunk_capacity: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            chunk_capacity: DEFAULT_CHUNK_CAPACITY,
        }
    }
}

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("cannot spawn an entity without components")]
    EmptyEntity,

    #[error("chunk {chunk} of archetype {archetype:#018x} is still referenced by in-flight work")]
    ChunkInUse { archetype: ArchetypeId, chunk: u32 },

    #[error("component {name} (id {component}) is already claimed by another query")]
    AccessConflict { component: ComponentId, name: String },

    #[error("entity {0} does not belong to this world")]
    UnknownEntity(EntityId),

    #[error("entity {entity} has no component {name} (id {component})")]
    MissingComponent {
        entity: EntityId,
        component: ComponentId,
        name: String,
    },

    #[error("chunk capacity must be at least 1")]
    InvalidChunkCapacity,

    #[error("component {component} does not match the column type stored in archetype {archetype:#018x}")]
    ColumnTypeMismatch {
        component: ComponentId,
        archetype: ArchetypeId,
    },
}

/// Chunks of one archetype, in spawn order.
struct ArchetypeStorage {
    archetype: Archetype,
    chunks: Vec<Arc<Chunk>>,
}

/// The main ECS world containing all entities and components.
///
/// Entities never move once spawned: each one is appended to the last
/// chunk of its archetype, and a new chunk is opened when that one is full.
pub struct World {
    config: WorldConfig,
    storages: HashMap<ArchetypeId, ArchetypeStorage>,
    comp_index: HashMap<ComponentId, Vec<ArchetypeId>>,
    directory: Arc<EntityDirectory>,
    access: Arc<ComponentAccess>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Create a new empty world with the default chunk capacity.
    pub fn new() -> Self {
        Self {
            config: WorldConfig::default(),
            storages: HashMap::new(),
            comp_index: HashMap::new(),
            directory: Arc::new(EntityDirectory::new()),
            access: Arc::new(ComponentAccess::new()),
        }
    }

    pub fn with_config(config: WorldConfig) -> Result<Self, WorldError> {
        if config.chunk_capacity == 0 {
            return Err(WorldError::InvalidChunkCapacity);
        }
        Ok(Self {
            config,
            ..Self::new()
        })
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Spawn an entity from a builder.
    ///
    /// Fails with [`WorldError::ChunkInUse`] while scheduled work still
    /// references the chunk the entity would be appended to.
    pub fn spawn(&mut self, builder: EntityBuilder) -> Result<Entity, WorldError> {
        if builder.is_empty() {
            return Err(WorldError::EmptyEntity);
        }
        let archetype = builder.archetype();
        let capacity = self.config.chunk_capacity;

        let storage = match self.storages.entry(archetype.id) {
            Entry::Occupied(o) => o.into_mut(),
            Entry::Vacant(v) => {
                for &cid in &archetype.components {
                    self.comp_index.entry(cid).or_default().push(archetype.id);
                }
                tracing::debug!(
                    archetype = archetype.id,
                    components = ?archetype.components,
                    "new archetype"
                );
                v.insert(ArchetypeStorage {
                    archetype: archetype.clone(),
                    chunks: Vec::new(),
                })
            }
        };

        let chunk_index = match storage.chunks.last() {
            Some(chunk) if !chunk.is_full() => storage.chunks.len() - 1,
            _ => {
                let index = storage.chunks.len();
                storage
                    .chunks
                    .push(Arc::new(Chunk::new(archetype.id, index as u32, capacity)));
                index
            }
        };

        let chunk = Arc::get_mut(&mut storage.chunks[chunk_index]).ok_or(
            WorldError::ChunkInUse {
                archetype: archetype.id,
                chunk: chunk_index as u32,
            },
        )?;

        let id = self.directory.next_id();
        let row = chunk.push_row(id, builder.into_components())?;
        let entity = Entity::new(id, archetype.id, chunk_index as u32, row);

        // Workers may still read an older directory; they keep their copy.
        Arc::make_mut(&mut self.directory).push(entity);
        Ok(entity)
    }

    /// Spawn `count` entities, building the i-th one with `build(i)`.
    pub fn spawn_many<F>(&mut self, count: usize, mut build: F) -> Result<Vec<Entity>, WorldError>
    where
        F: FnMut(usize) -> EntityBuilder,
    {
        let mut entities = Vec::with_capacity(count);
        for i in 0..count {
            entities.push(self.spawn(build(i))?);
        }
        tracing::debug!(count, "spawned entities");
        Ok(entities)
    }

    /// Build a query over every entity carrying all components of `S`.
    ///
    /// Fails with [`WorldError::AccessConflict`] while another query (or
    /// work scheduled from one) holds any of those components.
    ///
    /// # Panics
    /// If `S` names the same component twice.
    pub fn query<S: QueryShape>(&self) -> Result<Query<'_, S>, WorldError> {
        Query::new(self)
    }

    /// Get all archetype IDs that contain a specific component.
    pub fn archetypes_with(&self, cid: ComponentId) -> &[ArchetypeId] {
        self.comp_index.get(&cid).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Archetypes that have ALL of the specified components, in creation order.
    pub fn archetypes_with_all(&self, component_ids: &[ComponentId]) -> Vec<ArchetypeId> {
        let Some((&first, rest)) = component_ids.split_first() else {
            return Vec::new();
        };

        let mut result = self.archetypes_with(first).to_vec();
        for &cid in rest {
            let archs = self.archetypes_with(cid);
            result.retain(|a| archs.contains(a));
        }
        result
    }

    pub fn archetype(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.storages.get(&id).map(|s| &s.archetype)
    }

    pub fn archetype_count(&self) -> usize {
        self.storages.len()
    }

    /// Chunks of one archetype; empty for unknown archetypes.
    pub fn chunks_of(&self, archetype: ArchetypeId) -> &[Arc<Chunk>] {
        self.storages
            .get(&archetype)
            .map(|s| s.chunks.as_slice())
            .unwrap_or(&[])
    }

    pub fn chunk_count(&self) -> usize {
        self.storages.values().map(|s| s.chunks.len()).sum()
    }

    pub fn entity_count(&self) -> usize {
        self.directory.len()
    }

    pub fn resolve_entity(&self, id: EntityId) -> Option<Entity> {
        self.directory.get(id)
    }

    /// Shared handle to the id → entity directory.
    pub fn directory(&self) -> Arc<EntityDirectory> {
        Arc::clone(&self.directory)
    }

    pub fn access(&self) -> &Arc<ComponentAccess> {
        &self.access
    }

    /// Copy of one component value.
    ///
    /// Takes a short lease on `T`, so it fails with
    /// [`WorldError::AccessConflict`] while a query over `T` is alive.
    pub fn get<T: Component + Clone>(&self, entity: Entity) -> Result<T, WorldError> {
        let chunk = self.chunk_for(entity)?;
        let _lease = self.access.lease(&[T::ID])?;
        // SAFETY: the lease excludes every query, and therefore every work
        // item, that could be writing `T`.
        unsafe { chunk.value::<T>(entity.row() as usize) }
            .cloned()
            .ok_or_else(|| missing::<T>(entity))
    }

    /// Mutable access to one component value.
    ///
    /// Fails with [`WorldError::ChunkInUse`] while work still holds the
    /// entity's chunk.
    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Result<&mut T, WorldError> {
        self.chunk_for(entity)?;
        let slot = self
            .storages
            .get_mut(&entity.archetype())
            .and_then(|s| s.chunks.get_mut(entity.chunk() as usize))
            .ok_or(WorldError::UnknownEntity(entity.id()))?;
        let chunk = Arc::get_mut(slot).ok_or(WorldError::ChunkInUse {
            archetype: entity.archetype(),
            chunk: entity.chunk(),
        })?;
        chunk
            .column_mut::<T>()
            .and_then(|column| column.get_mut(entity.row() as usize))
            .ok_or_else(|| missing::<T>(entity))
    }

    fn chunk_for(&self, entity: Entity) -> Result<&Chunk, WorldError> {
        if self.directory.get(entity.id()) != Some(entity) {
            return Err(WorldError::UnknownEntity(entity.id()));
        }
        self.chunks_of(entity.archetype())
            .get(entity.chunk() as usize)
            .map(|chunk| chunk.as_ref())
            .ok_or(WorldError::UnknownEntity(entity.id()))
    }
}

fn missing<T: Component>(entity: Entity) -> WorldError {
    WorldError::MissingComponent {
        entity: entity.id(),
        component: T::ID,
        name: name_of(T::ID),
    }
}

/// Spawn an entity into the world using builder-style component construction.
///
/// Evaluates to the world's `Result<Entity, WorldError>`.
#[macro_export]
macro_rules! spawn {
    ($world:expr $(, $component:expr)+ $(,)?) => {{
        let builder = $crate::ecs::EntityBuilder::new()
            $(.with($component))+;
        $world.spawn(builder)
    }};
}
