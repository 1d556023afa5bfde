// component.rs - Runtime component registration
//
// Components are identified by u32 IDs, not Rust TypeIds, so error messages
// and leases can name a component without knowing its Rust type.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::mem::{align_of, size_of};
use std::sync::RwLock;

pub type ComponentId = u32;

/// Metadata describing a component's memory layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentMeta {
    pub id: ComponentId,
    pub name: &'static str,
    pub size: usize,
    pub align: usize,
}

/// Global registry of every component that has been spawned or queried.
static REGISTRY: Lazy<RwLock<HashMap<ComponentId, ComponentMeta>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Record `meta` under its id.
///
/// Panics if the id is already taken by a different name or layout.
pub fn register_component(meta: ComponentMeta) {
    let mut map = REGISTRY
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    match map.get(&meta.id) {
        Some(known) if *known == meta => {}
        Some(known) => panic!(
            "component id {} claimed by {} ({}B, align {}) and {} ({}B, align {})",
            meta.id, known.name, known.size, known.align, meta.name, meta.size, meta.align
        ),
        None => {
            tracing::trace!(id = meta.id, name = meta.name, "component registered");
            map.insert(meta.id, meta);
        }
    }
}

pub fn meta_of(id: ComponentId) -> Option<ComponentMeta> {
    REGISTRY
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .get(&id)
        .cloned()
}

/// Human-readable component name, falling back to `#<id>` for unknown ids.
pub fn name_of(id: ComponentId) -> String {
    meta_of(id)
        .map(|meta| meta.name.to_string())
        .unwrap_or_else(|| format!("#{id}"))
}

/// Trait for Rust-defined components.
///
/// Components are plain data moved into chunk columns. They must be
/// `Send + Sync` because worker threads hand out `&mut` references to
/// disjoint rows of the same column.
pub trait Component: 'static + Sized + Send + Sync {
    /// Globally unique component ID.
    const ID: ComponentId;

    /// Human-readable name for debugging.
    const NAME: &'static str;

    /// Register this component's layout with the global registry.
    fn ensure_registered() {
        register_component(ComponentMeta {
            id: Self::ID,
            name: Self::NAME,
            size: size_of::<Self>(),
            align: align_of::<Self>(),
        });
    }
}

/// Helper macro to implement Component trait.
///
/// # Example
/// ```ignore
/// #[derive(Clone, Copy)]
/// struct Health { hp: i32 }
///
/// define_component!(Health, 3, "Health");
/// ```
#[macro_export]
macro_rules! define_component {
    ($ty:ty, $id:expr, $name:expr) => {
        impl $crate::ecs::Component for $ty {
            const ID: $crate::ecs::ComponentId = $id;
            const NAME: &'static str = $name;
        }
    };
}
