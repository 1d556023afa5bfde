//! Collecting handles until a sync point.

use crate::combine::combine;
use crate::handle::JobHandle;

/// Holds job handles scheduled during a frame or phase so they can be
/// completed together.
///
/// Dropping the store completes everything still in it.
#[derive(Debug, Default)]
pub struct HandleStore<'q> {
    handles: Vec<JobHandle<'q>>,
}

impl<'q> HandleStore<'q> {
    pub fn new() -> Self {
        Self {
            handles: Vec::new(),
        }
    }

    pub fn add(&mut self, handle: JobHandle<'q>) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Whether every stored handle has finished, without blocking.
    pub fn is_completed(&self) -> bool {
        self.handles.iter().all(JobHandle::is_completed)
    }

    /// Dispose every stored handle and empty the store.
    pub fn complete_all(&mut self) {
        let count = self.handles.len();
        for handle in &mut self.handles {
            handle.dispose();
        }
        self.handles.clear();
        tracing::trace!(count, "handle store completed");
    }

    /// One handle covering everything stored.
    pub fn into_combined(mut self) -> JobHandle<'q> {
        combine(&mut self.handles)
    }
}
