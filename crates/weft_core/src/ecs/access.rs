use crate::ecs::{name_of, ComponentId, WorldError};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// Tracks which components are currently claimed by a live query.
///
/// A claim is exclusive: while a query (or any work built from it) holds a
/// lease on a component, no other lease covering that component can be
/// taken. Sequential batches over the same data are ordered by the job
/// handles; the lease catches batches from two different queries that
/// would otherwise write the same columns at once.
#[derive(Debug, Default)]
pub struct ComponentAccess {
    claimed: Mutex<HashSet<ComponentId>>,
}

impl ComponentAccess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim every listed component, or none of them.
    pub fn lease(self: &Arc<Self>, components: &[ComponentId]) -> Result<AccessLease, WorldError> {
        let mut claimed = self.claimed();
        if let Some(&component) = components.iter().find(|id| claimed.contains(id)) {
            return Err(WorldError::AccessConflict {
                component,
                name: name_of(component),
            });
        }
        claimed.extend(components.iter().copied());
        drop(claimed);

        tracing::trace!(?components, "component lease acquired");
        Ok(AccessLease {
            tracker: Arc::clone(self),
            components: components.to_vec(),
        })
    }

    pub fn is_claimed(&self, component: ComponentId) -> bool {
        self.claimed().contains(&component)
    }

    fn claimed(&self) -> MutexGuard<'_, HashSet<ComponentId>> {
        self.claimed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Exclusive claim on a set of components, released on drop.
#[derive(Debug)]
pub struct AccessLease {
    tracker: Arc<ComponentAccess>,
    components: Vec<ComponentId>,
}

impl AccessLease {
    pub fn components(&self) -> &[ComponentId] {
        &self.components
    }
}

impl Drop for AccessLease {
    fn drop(&mut self) {
        let mut claimed = self.tracker.claimed();
        for id in &self.components {
            claimed.remove(id);
        }
        tracing::trace!(components = ?self.components, "component lease released");
    }
}
