//! Worker pool executing cancelable work units in priority order.
//!
//! Units sit in an [`IndexedPriorityQueue`] guarded by a single mutex, so a
//! queued unit can be re-prioritised or withdrawn in O(log n) until a worker
//! picks it up. Once a unit runs it can only be stopped cooperatively through
//! whatever token its closure observes.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use rustc_hash::FxHashMap;

use crate::priority_queue::IndexedPriorityQueue;

static NEXT_UNIT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a [`WorkUnit`], stable across priority updates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(u64);

impl UnitId {
    /// Allocates a fresh, process-wide unique id.
    pub fn next() -> Self {
        Self(NEXT_UNIT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A unit of work: a one-shot closure plus its identity.
pub struct WorkUnit {
    id: UnitId,
    job: Job,
}

impl WorkUnit {
    pub fn new(job: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id: UnitId::next(),
            job: Box::new(job),
        }
    }

    pub fn id(&self) -> UnitId {
        self.id
    }
}

impl std::fmt::Debug for WorkUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkUnit").field("id", &self.id).finish_non_exhaustive()
    }
}

struct QueueState<P> {
    queue: IndexedPriorityQueue<UnitId, P>,
    jobs: FxHashMap<UnitId, Job>,
    shutdown: bool,
}

struct Shared<P> {
    state: Mutex<QueueState<P>>,
    available: Condvar,
}

impl<P> Shared<P> {
    fn lock(&self) -> MutexGuard<'_, QueueState<P>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bounded worker pool serving the smallest priority first.
///
/// A pool built with [`manual`](Self::manual) spawns no threads; its units run
/// only when the owner calls [`run_next`](Self::run_next).
pub struct PriorityTaskExecutor<P> {
    shared: Arc<Shared<P>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Default worker count: all cores but two, at least one.
pub fn default_worker_threads() -> usize {
    let cpus = num_cpus::get().max(2);
    (cpus - 2).max(1)
}

impl<P> PriorityTaskExecutor<P>
where
    P: Ord + Send + 'static,
{
    /// Spawns `thread_count` workers named `{name}-{index}`.
    pub fn new(thread_count: usize, name: &str) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                queue: IndexedPriorityQueue::new(),
                jobs: FxHashMap::default(),
                shutdown: false,
            }),
            available: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(thread_count);
        for index in 0..thread_count {
            let shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || worker_loop(&shared))?;
            workers.push(handle);
        }
        tracing::debug!(threads = thread_count, "priority task executor started");

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
        })
    }

    /// A pool without threads, stepped by [`run_next`](Self::run_next).
    pub fn manual() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    queue: IndexedPriorityQueue::new(),
                    jobs: FxHashMap::default(),
                    shutdown: false,
                }),
                available: Condvar::new(),
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Queues new units, or updates the priority of units that are still
    /// queued. A unit whose id is already queued is dropped in favour of the
    /// queued one, so nothing ever runs twice.
    pub fn add_or_update_tasks(&self, units: impl IntoIterator<Item = (WorkUnit, P)>) {
        let mut state = self.shared.lock();
        if state.shutdown {
            return;
        }
        let mut added = 0;
        for (unit, priority) in units {
            if state.queue.push_or_update(unit.id, priority) {
                state.jobs.insert(unit.id, unit.job);
                added += 1;
            }
        }
        drop(state);
        for _ in 0..added {
            self.shared.available.notify_one();
        }
    }

    /// Updates the priority of queued units. Units that already started or
    /// were never queued are skipped.
    pub fn update_priorities(&self, priorities: impl IntoIterator<Item = (UnitId, P)>) -> usize {
        let mut state = self.shared.lock();
        let mut updated = 0;
        for (id, priority) in priorities {
            if state.queue.update(&id, priority) {
                updated += 1;
            }
        }
        updated
    }

    /// Withdraws queued units. Running units are left alone.
    pub fn remove_tasks(&self, ids: &[UnitId]) -> usize {
        let mut state = self.shared.lock();
        let mut removed = 0;
        for id in ids {
            if state.queue.remove(id).is_some() {
                state.jobs.remove(id);
                removed += 1;
            }
        }
        removed
    }

    /// `true` iff the unit is queued and has not started.
    pub fn contains_task(&self, id: UnitId) -> bool {
        self.shared.lock().queue.contains(&id)
    }

    pub fn queued_count(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Runs the highest-priority queued unit on the calling thread.
    ///
    /// Returns `false` if the queue was empty.
    pub fn run_next(&self) -> bool {
        let job = {
            let mut state = self.shared.lock();
            take_next(&mut state)
        };
        match job {
            Some(job) => {
                run_guarded(job);
                true
            }
            None => false,
        }
    }
}

impl<P> PriorityTaskExecutor<P> {
    pub fn is_shutdown(&self) -> bool {
        self.shared.lock().shutdown
    }

    /// Drops every queued unit and stops the workers after their current unit.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.lock();
            state.shutdown = true;
            state.queue.clear();
            state.jobs.clear();
        }
        self.shared.available.notify_all();

        let handles: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let current = std::thread::current().id();
        for handle in handles {
            // The last owner may be dropped from inside one of our own units.
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }
}

impl<P> Drop for PriorityTaskExecutor<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn take_next<P: Ord>(state: &mut QueueState<P>) -> Option<Job> {
    while let Some((id, _)) = state.queue.pop() {
        if let Some(job) = state.jobs.remove(&id) {
            return Some(job);
        }
    }
    None
}

fn worker_loop<P: Ord>(shared: &Shared<P>) {
    loop {
        let job = {
            let mut state = shared.lock();
            loop {
                if state.shutdown {
                    return;
                }
                if let Some(job) = take_next(&mut state) {
                    break job;
                }
                state = shared
                    .available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };
        run_guarded(job);
    }
}

/// Runs a job, logging instead of unwinding if it panics.
pub(crate) fn run_guarded(job: Job) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
        let message = panic_message(&*panic);
        tracing::error!(%message, "work unit panicked");
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
