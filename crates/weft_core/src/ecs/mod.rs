//! Entity Component System collaborator for the task layer.
//!
//! Storage is organised per archetype into fixed-capacity chunks. Each
//! chunk is shared through an `Arc`, so work scheduled against a chunk keeps
//! its memory alive; structural writes need the chunk back exclusively.
//! Queries resolve chunk views for a closed set of tuple shapes and hold a
//! lease on the components they touch for as long as any work built from
//! them is alive.

mod access;
mod archetype;
mod builder;
mod chunk;
mod component;
mod entity;
mod query;
mod world;

pub use access::{AccessLease, ComponentAccess};
pub use archetype::{Archetype, ArchetypeId};
pub use builder::EntityBuilder;
pub use chunk::{Chunk, ColumnPtr};
pub use component::{meta_of, name_of, register_component, Component, ComponentId, ComponentMeta};
pub use entity::{Entity, EntityDirectory, EntityId};
pub use query::{ChunkView, Query, QueryShape};
pub use world::{World, WorldConfig, WorldError, DEFAULT_CHUNK_CAPACITY};
