// rayon_backend.rs - TaskBackend on a dedicated rayon pool
//
// Every scheduled batch gets a counting latch and a token in the in-flight
// table. Each item is spawned on the pool separately; the last item to
// finish opens the latch. Combined tokens are groups of the completions they
// were built from.

use crate::backend::{TaskBackend, TaskToken, WorkDescriptor};
use crate::error::TaskError;
use crate::settings::TaskSettings;
use dashmap::DashMap;
use rayon::prelude::*;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Empty help rounds a pool thread tries before blocking in `wait`.
const IDLE_HELP_ROUNDS: usize = 64;

/// Opens once `remaining` reaches zero.
struct Latch {
    remaining: AtomicUsize,
    set: AtomicBool,
    lock: Mutex<()>,
    signal: Condvar,
}

impl Latch {
    fn new(count: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(count),
            set: AtomicBool::new(count == 0),
            lock: Mutex::new(()),
            signal: Condvar::new(),
        }
    }

    /// Count one item down; `on_last` runs before waiters are woken.
    fn count_down(&self, on_last: impl FnOnce()) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        on_last();
        {
            let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
            self.set.store(true, Ordering::Release);
        }
        self.signal.notify_all();
    }

    #[inline]
    fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }

    fn wait(&self) {
        let mut guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        while !self.is_set() {
            guard = self.signal.wait(guard).unwrap_or_else(|p| p.into_inner());
        }
    }
}

enum Completion {
    Batch(Arc<Latch>),
    Group(Vec<Arc<Completion>>),
}

impl Completion {
    fn is_done(&self) -> bool {
        match self {
            Completion::Batch(latch) => latch.is_set(),
            Completion::Group(parts) => parts.iter().all(|part| part.is_done()),
        }
    }

    fn wait(&self) {
        match self {
            Completion::Batch(latch) => latch.wait(),
            Completion::Group(parts) => parts.iter().for_each(|part| part.wait()),
        }
    }
}

/// [`TaskBackend`] running work items on its own rayon thread pool.
pub struct RayonBackend {
    pool: rayon::ThreadPool,
    in_flight: DashMap<u64, Arc<Completion>>,
    next_token: AtomicU64,
    max_in_flight: usize,
    pending_batches: Arc<AtomicUsize>,
    panicked: Arc<AtomicUsize>,
}

impl RayonBackend {
    pub fn new(settings: &TaskSettings) -> Result<Self, TaskError> {
        let prefix = settings.thread_name_prefix.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.worker_threads)
            .thread_name(move |index| format!("{prefix}-{index}"))
            .build()?;

        tracing::info!(
            threads = pool.current_num_threads(),
            max_in_flight = settings.max_in_flight_batches,
            "task backend ready"
        );

        Ok(Self {
            pool,
            in_flight: DashMap::new(),
            next_token: AtomicU64::new(1),
            max_in_flight: settings.max_in_flight_batches,
            pending_batches: Arc::new(AtomicUsize::new(0)),
            panicked: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn thread_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Scheduled work items that panicked so far.
    pub fn panicked_items(&self) -> usize {
        self.panicked.load(Ordering::Relaxed)
    }

    /// Scheduled batches that have not finished yet.
    pub fn pending_batches(&self) -> usize {
        self.pending_batches.load(Ordering::Acquire)
    }

    /// Tokens issued and not yet released or merged.
    pub fn tracked_tokens(&self) -> usize {
        self.in_flight.len()
    }

    fn issue(&self, completion: Completion) -> TaskToken {
        let raw = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.in_flight.insert(raw, Arc::new(completion));
        TaskToken::from_raw(raw)
    }

    fn reserve_slot(&self) -> bool {
        let max = self.max_in_flight;
        self.pending_batches
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .is_ok()
    }

    fn completion(&self, token: TaskToken) -> Option<Arc<Completion>> {
        // Clone out so the map shard is not locked while waiting.
        self.in_flight
            .get(&token.raw())
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Run other pool work until `completion` is done, from one of this
    /// pool's threads.
    ///
    /// After `IDLE_HELP_ROUNDS` rounds with nothing to run, every queued
    /// item has been taken by some worker, so this blocks on the completion
    /// instead of spinning. Returns whether it blocked.
    fn help_until_done(&self, completion: &Completion) -> bool {
        let mut idle = 0;
        while !completion.is_done() {
            if matches!(rayon::yield_now(), Some(rayon::Yield::Executed)) {
                idle = 0;
                continue;
            }
            idle += 1;
            if idle >= IDLE_HELP_ROUNDS {
                completion.wait();
                return true;
            }
            std::thread::yield_now();
        }
        false
    }
}

impl TaskBackend for RayonBackend {
    fn execute_batch(&self, work: &dyn WorkDescriptor, count: usize) {
        self.pool
            .install(|| (0..count).into_par_iter().for_each(|i| work.execute_task(i)));
    }

    fn schedule_batch(&self, work: Arc<dyn WorkDescriptor>, count: usize) -> TaskToken {
        if !self.reserve_slot() {
            tracing::warn!(
                label = work.label(),
                limit = self.max_in_flight,
                "in-flight batch limit reached"
            );
            return TaskToken::EMPTY;
        }

        let latch = Arc::new(Latch::new(count));
        let token = self.issue(Completion::Batch(Arc::clone(&latch)));
        if count == 0 {
            self.pending_batches.fetch_sub(1, Ordering::AcqRel);
            return token;
        }

        for index in 0..count {
            let work = Arc::clone(&work);
            let latch = Arc::clone(&latch);
            let pending = Arc::clone(&self.pending_batches);
            let panicked = Arc::clone(&self.panicked);
            self.pool.spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| work.execute_task(index)));
                if let Err(payload) = result {
                    panicked.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        label = work.label(),
                        index,
                        message = panic_message(payload.as_ref()),
                        "work item panicked"
                    );
                }
                // Waiters must not observe completion while this item still
                // holds the batch's resources.
                drop(work);
                latch.count_down(|| {
                    pending.fetch_sub(1, Ordering::AcqRel);
                });
            });
        }

        tracing::trace!(%token, items = count, "batch spawned");
        token
    }

    fn is_completed(&self, token: TaskToken) -> bool {
        if token.is_empty() {
            return true;
        }
        self.completion(token).map_or(true, |c| c.is_done())
    }

    fn wait(&self, token: TaskToken) {
        if token.is_empty() {
            return;
        }
        let Some(completion) = self.completion(token) else {
            return;
        };

        if self.pool.current_thread_index().is_some() {
            self.help_until_done(&completion);
            return;
        }
        completion.wait();
    }

    fn combine(&self, tokens: &[TaskToken]) -> TaskToken {
        let live: Vec<TaskToken> = tokens.iter().copied().filter(|t| !t.is_empty()).collect();
        if live.is_empty() {
            return TaskToken::EMPTY;
        }

        let parts: Vec<Arc<Completion>> = live
            .iter()
            .filter_map(|token| self.in_flight.remove(&token.raw()).map(|(_, c)| c))
            .collect();
        let token = self.issue(Completion::Group(parts));
        tracing::trace!(%token, inputs = live.len(), "tokens combined");
        token
    }

    fn release(&self, token: TaskToken) {
        if !token.is_empty() {
            self.in_flight.remove(&token.raw());
        }
    }

    fn name(&self) -> &str {
        "rayon"
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Sleeper {
        items: usize,
        done: AtomicUsize,
        delay: Duration,
    }

    impl Sleeper {
        fn new(items: usize, delay_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                items,
                done: AtomicUsize::new(0),
                delay: Duration::from_millis(delay_ms),
            })
        }
    }

    impl WorkDescriptor for Sleeper {
        fn task_count(&self) -> usize {
            self.items
        }

        fn execute_task(&self, index: usize) {
            if index >= self.items {
                return;
            }
            std::thread::sleep(self.delay);
            self.done.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// One item that flags when it starts, then sleeps.
    struct Gate {
        started: AtomicBool,
        done: AtomicUsize,
    }

    impl WorkDescriptor for Gate {
        fn task_count(&self) -> usize {
            1
        }

        fn execute_task(&self, index: usize) {
            if index != 0 {
                return;
            }
            self.started.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            self.done.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Exploding;

    impl WorkDescriptor for Exploding {
        fn task_count(&self) -> usize {
            3
        }

        fn execute_task(&self, index: usize) {
            if index == 1 {
                panic!("item one explodes");
            }
        }

        fn label(&self) -> &str {
            "exploding"
        }
    }

    fn backend(max_in_flight: usize) -> RayonBackend {
        RayonBackend::new(&TaskSettings {
            worker_threads: 4,
            max_in_flight_batches: max_in_flight,
            ..TaskSettings::default()
        })
        .expect("pool")
    }

    #[test]
    fn execute_batch_runs_every_item_before_returning() {
        let backend = backend(8);
        let work = Sleeper::new(16, 1);
        backend.execute_batch(work.as_ref(), 16);
        assert_eq!(work.done.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn wait_blocks_until_the_batch_finishes() {
        let backend = backend(8);
        let work = Sleeper::new(8, 5);
        let token = backend.schedule_batch(work.clone(), 8);
        assert!(!token.is_empty());

        backend.wait(token);
        assert!(backend.is_completed(token));
        assert_eq!(work.done.load(Ordering::SeqCst), 8);
        assert_eq!(backend.pending_batches(), 0);

        backend.release(token);
        assert_eq!(backend.tracked_tokens(), 0);
        // The pool dropped its clones before the latch opened.
        assert_eq!(Arc::strong_count(&work), 1);
    }

    #[test]
    fn empty_and_unknown_tokens_are_complete() {
        let backend = backend(8);
        assert!(backend.is_completed(TaskToken::EMPTY));
        assert!(backend.is_completed(TaskToken::from_raw(999)));
        backend.wait(TaskToken::EMPTY);
        backend.wait(TaskToken::from_raw(999));
    }

    #[test]
    fn scheduling_fails_at_the_in_flight_limit() {
        let disabled = backend(0);
        assert!(disabled
            .schedule_batch(Sleeper::new(2, 0), 2)
            .is_empty());

        let limited = backend(1);
        let first = limited.schedule_batch(Sleeper::new(2, 20), 2);
        assert!(!first.is_empty());
        assert!(limited.schedule_batch(Sleeper::new(2, 0), 2).is_empty());

        limited.wait(first);
        limited.release(first);
        let again = limited.schedule_batch(Sleeper::new(2, 0), 2);
        assert!(!again.is_empty());
        limited.wait(again);
    }

    #[test]
    fn combined_token_waits_for_every_input() {
        let backend = backend(8);
        let a = Sleeper::new(4, 5);
        let b = Sleeper::new(4, 10);
        let ta = backend.schedule_batch(a.clone(), 4);
        let tb = backend.schedule_batch(b.clone(), 4);

        let merged = backend.combine(&[ta, TaskToken::EMPTY, tb]);
        assert!(!merged.is_empty());
        // Inputs now belong to the merged token.
        assert_eq!(backend.tracked_tokens(), 1);

        backend.wait(merged);
        assert_eq!(a.done.load(Ordering::SeqCst), 4);
        assert_eq!(b.done.load(Ordering::SeqCst), 4);
        backend.release(merged);
        assert_eq!(backend.tracked_tokens(), 0);
    }

    #[test]
    fn combining_nothing_fails() {
        let backend = backend(8);
        assert!(backend.combine(&[]).is_empty());
        assert!(backend.combine(&[TaskToken::EMPTY]).is_empty());
    }

    #[test]
    fn panicking_items_still_complete_the_batch() {
        let backend = backend(8);
        let token = backend.schedule_batch(Arc::new(Exploding), 3);
        backend.wait(token);
        assert!(backend.is_completed(token));
        assert_eq!(backend.panicked_items(), 1);
        backend.release(token);
    }

    #[test]
    fn waiting_from_a_worker_thread_helps_instead_of_blocking() {
        let backend = Arc::new(RayonBackend::new(&TaskSettings {
            worker_threads: 1,
            ..TaskSettings::default()
        })
        .expect("pool"));

        let inner = Sleeper::new(4, 1);
        let outer_backend = Arc::clone(&backend);
        let outer_inner = Arc::clone(&inner);
        let seen = Arc::new(AtomicUsize::new(0));
        let outer_seen = Arc::clone(&seen);

        // The only worker schedules more work and waits on it.
        backend.pool.install(move || {
            let token = outer_backend.schedule_batch(outer_inner.clone(), 4);
            outer_backend.wait(token);
            outer_seen.store(outer_inner.done.load(Ordering::SeqCst), Ordering::SeqCst);
            outer_backend.release(token);
        });
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn idle_worker_blocks_instead_of_spinning() {
        let backend = Arc::new(RayonBackend::new(&TaskSettings {
            worker_threads: 2,
            ..TaskSettings::default()
        })
        .expect("pool"));

        let gate = Arc::new(Gate {
            started: AtomicBool::new(false),
            done: AtomicUsize::new(0),
        });
        let token = backend.schedule_batch(gate.clone(), 1);
        while !gate.started.load(Ordering::SeqCst) {
            std::thread::yield_now();
        }

        // The other worker has nothing to help with while the item runs.
        let completion = backend.completion(token).expect("tracked");
        let helper = Arc::clone(&backend);
        let blocked = backend.pool.install(move || helper.help_until_done(&completion));

        assert!(blocked);
        assert_eq!(gate.done.load(Ordering::SeqCst), 1);
        backend.release(token);
    }
}
