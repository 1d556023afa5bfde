//! Joining several job handles into one.

use crate::backend::{TaskBackend, TaskToken, WorkDescriptor};
use crate::handle::JobHandle;
use std::sync::Arc;

/// Merge `handles` into one handle that completes once all of them have.
///
/// Every non-trivial input is detached: its token and resources move into
/// the returned handle and the input becomes inert. Trivial, disposed and
/// detached inputs are skipped. Inputs scheduled on a different backend
/// than the first pending one cannot be merged and are completed here.
///
/// If the backend cannot merge the tokens, each input is waited on and
/// released before an already-completed handle is returned.
pub fn combine<'q>(handles: &mut [JobHandle<'q>]) -> JobHandle<'q> {
    combine_counted(handles).0
}

/// [`combine`], also returning how many inputs were detached into the result.
pub(crate) fn combine_counted<'q>(handles: &mut [JobHandle<'q>]) -> (JobHandle<'q>, usize) {
    let mut backend: Option<Arc<dyn TaskBackend>> = None;
    let mut tokens: Vec<TaskToken> = Vec::new();
    let mut resources: Vec<Arc<dyn WorkDescriptor>> = Vec::new();

    for handle in handles.iter_mut() {
        let foreign = match (&backend, handle.backend()) {
            (Some(first), Some(other)) => !Arc::ptr_eq(first, other),
            _ => false,
        };
        if foreign {
            tracing::warn!(
                token = %handle.token(),
                "handle belongs to another backend; completing it instead of merging"
            );
            handle.dispose();
            continue;
        }

        let Some(parts) = handle.detach() else {
            continue;
        };
        backend.get_or_insert(parts.backend);
        tokens.push(parts.token);
        resources.extend(parts.resources);
    }

    let joined = tokens.len();
    let Some(backend) = backend else {
        return (JobHandle::completed(), joined);
    };

    let merged = backend.combine(&tokens);
    if merged.is_empty() {
        tracing::warn!(
            inputs = tokens.len(),
            backend = backend.name(),
            "backend could not combine handles; waiting on each"
        );
        for &token in &tokens {
            backend.wait(token);
            backend.release(token);
        }
        drop(resources);
        return (JobHandle::completed(), joined);
    }

    tracing::trace!(token = %merged, inputs = joined, "handles combined");
    (JobHandle::pending(backend, merged, resources), joined)
}
