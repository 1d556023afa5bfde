//! The thread-pool capability the task layer submits work to.

use std::fmt;
use std::sync::Arc;

/// Opaque completion token issued by a [`TaskBackend`].
///
/// [`TaskToken::EMPTY`] stands for "nothing to wait on": it is what a
/// trivial handle carries, and what a backend returns when it could not
/// schedule or combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TaskToken(u64);

impl TaskToken {
    pub const EMPTY: TaskToken = TaskToken(0);

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TaskToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// A batch of independent work items, run by index.
pub trait WorkDescriptor: Send + Sync {
    fn task_count(&self) -> usize;

    /// Run item `index`. Indices outside `0..task_count()` do nothing.
    fn execute_task(&self, index: usize);

    fn label(&self) -> &str {
        "work"
    }
}

/// Runs batches of work items on worker threads.
///
/// Tokens returned by `schedule_batch` and `combine` stay valid until
/// `release`; unknown or released tokens report as completed.
pub trait TaskBackend: Send + Sync {
    /// Run items `0..count` and return once every one has finished.
    fn execute_batch(&self, work: &dyn WorkDescriptor, count: usize);

    /// Start items `0..count` without blocking.
    ///
    /// Returns [`TaskToken::EMPTY`] if the batch could not be scheduled, in
    /// which case none of its items will run.
    fn schedule_batch(&self, work: Arc<dyn WorkDescriptor>, count: usize) -> TaskToken;

    fn is_completed(&self, token: TaskToken) -> bool;

    /// Block until `token` has completed.
    fn wait(&self, token: TaskToken);

    /// Merge tokens into one that completes once all of them have.
    ///
    /// On success the inputs belong to the merged token and must not be
    /// released separately. On failure ([`TaskToken::EMPTY`]) the caller
    /// keeps them.
    fn combine(&self, tokens: &[TaskToken]) -> TaskToken;

    /// Forget a completed token.
    fn release(&self, token: TaskToken);

    fn name(&self) -> &str {
        "backend"
    }
}
