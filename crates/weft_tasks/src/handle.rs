//! Completion tracking for scheduled batches.

use crate::backend::{TaskBackend, TaskToken, WorkDescriptor};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Work may still be running.
    Pending,
    /// Work has finished; token and resources are not released yet.
    Completed,
    /// Token and resources have been released.
    Disposed,
    /// Ownership moved into a combined handle; this one is inert.
    Detached,
}

/// Token and resources taken out of a handle by [`crate::combine`].
pub(crate) struct DetachedParts {
    pub(crate) backend: Arc<dyn TaskBackend>,
    pub(crate) token: TaskToken,
    pub(crate) resources: Vec<Arc<dyn WorkDescriptor>>,
}

/// A scheduled batch and the resources its work items use.
///
/// Disposing waits for the batch first, then releases the token and the
/// resources exactly once. Dropping a handle disposes it, so a handle can
/// never let its resources go while work is still running.
///
/// The handle mutably borrows the query it was scheduled from: the same
/// query cannot be scheduled again until the handle is gone.
#[must_use = "dropping a job handle waits for its work to finish"]
pub struct JobHandle<'q> {
    token: TaskToken,
    backend: Option<Arc<dyn TaskBackend>>,
    resources: Vec<Arc<dyn WorkDescriptor>>,
    state: HandleState,
    _query: PhantomData<&'q mut ()>,
}

impl<'q> JobHandle<'q> {
    /// A handle with nothing to wait on.
    pub fn completed() -> Self {
        Self {
            token: TaskToken::EMPTY,
            backend: None,
            resources: Vec::new(),
            state: HandleState::Completed,
            _query: PhantomData,
        }
    }

    pub(crate) fn pending(
        backend: Arc<dyn TaskBackend>,
        token: TaskToken,
        resources: Vec<Arc<dyn WorkDescriptor>>,
    ) -> Self {
        debug_assert!(!token.is_empty(), "pending handle needs a token");
        Self {
            token,
            backend: Some(backend),
            resources,
            state: HandleState::Pending,
            _query: PhantomData,
        }
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn token(&self) -> TaskToken {
        self.token
    }

    /// Whether this handle never had backend work.
    pub fn is_trivial(&self) -> bool {
        self.token.is_empty()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub(crate) fn backend(&self) -> Option<&Arc<dyn TaskBackend>> {
        self.backend.as_ref()
    }

    /// Non-blocking poll. Disposed and detached handles report `true`.
    pub fn is_completed(&self) -> bool {
        match (self.state, &self.backend) {
            (HandleState::Pending, Some(backend)) => backend.is_completed(self.token),
            _ => true,
        }
    }

    /// Block until the batch has finished. Resources stay owned.
    pub fn wait(&mut self) {
        if self.state != HandleState::Pending {
            return;
        }
        if let Some(backend) = &self.backend {
            backend.wait(self.token);
        }
        self.state = HandleState::Completed;
    }

    /// Wait for the batch, then release the token and resources.
    ///
    /// Calling it again is a no-op.
    pub fn dispose(&mut self) {
        match self.state {
            HandleState::Disposed | HandleState::Detached => return,
            HandleState::Pending => self.wait(),
            HandleState::Completed => {}
        }

        if let Some(backend) = self.backend.take() {
            backend.release(self.token);
        }
        let released = self.resources.len();
        self.resources.clear();
        self.state = HandleState::Disposed;
        tracing::trace!(token = %self.token, released, "job handle disposed");
    }

    /// Dispose and consume the handle.
    pub fn complete(mut self) {
        self.dispose();
    }

    /// Move the token and resources out, leaving this handle inert.
    ///
    /// Returns `None` for trivial, disposed or already detached handles.
    pub(crate) fn detach(&mut self) -> Option<DetachedParts> {
        if self.is_trivial()
            || matches!(self.state, HandleState::Disposed | HandleState::Detached)
        {
            return None;
        }
        let backend = self.backend.take()?;
        self.state = HandleState::Detached;
        Some(DetachedParts {
            backend,
            token: self.token,
            resources: std::mem::take(&mut self.resources),
        })
    }
}

impl Drop for JobHandle<'_> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for JobHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("token", &self.token)
            .field("state", &self.state)
            .field("resources", &self.resources.len())
            .finish()
    }
}
