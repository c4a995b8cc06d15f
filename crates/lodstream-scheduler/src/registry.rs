//! Per-block task bookkeeping: lifecycle state, priority and generation tag.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::Identity;
use crate::engine::CancellationToken;
use crate::error::InvariantViolation;
use crate::executor::{UnitId, WorkUnit};
use crate::invariants::{describe, ensure_invariant, report};
use crate::key::{BlockKey, BlockPriority};
use crate::state::TaskState;

/// A generation task for one block.
#[derive(Debug)]
pub struct Task {
    pub unit_id: UnitId,
    /// Held until the task is handed to the executor.
    unit: Option<WorkUnit>,
    pub priority: BlockPriority,
    /// Scene update counter at creation time.
    pub tag: u64,
    pub state: TaskState,
    pub cancel: CancellationToken,
}

/// At most one task per block key.
#[derive(Debug)]
pub struct TaskRegistry<T> {
    tasks: FxHashMap<BlockKey<T>, Task>,
    failed: FxHashSet<BlockKey<T>>,
}

impl<T> Default for TaskRegistry<T> {
    fn default() -> Self {
        Self {
            tasks: FxHashMap::default(),
            failed: FxHashSet::default(),
        }
    }
}

impl<T: Identity> TaskRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, key: &BlockKey<T>) -> bool {
        self.tasks.contains_key(key)
    }

    pub fn get(&self, key: &BlockKey<T>) -> Option<&Task> {
        self.tasks.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &BlockKey<T>> {
        self.tasks.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BlockKey<T>, &Task)> {
        self.tasks.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&BlockKey<T>, &mut Task)> {
        self.tasks.iter_mut()
    }

    /// Registers a task in `Created` state. A second task for the same key is
    /// an invariant violation and is not registered.
    pub fn create(&mut self, key: BlockKey<T>, unit: WorkUnit, priority: BlockPriority, tag: u64) -> bool {
        if self.tasks.contains_key(&key) {
            report(&InvariantViolation::DuplicateTask {
                key: describe(&key),
            });
            return false;
        }
        self.failed.remove(&key);
        self.tasks.insert(
            key,
            Task {
                unit_id: unit.id(),
                unit: Some(unit),
                priority,
                tag,
                state: TaskState::Created,
                cancel: CancellationToken::new(),
            },
        );
        true
    }

    /// Moves `Created` tasks to `Scheduled` and returns their units for one
    /// batched executor submission. Keys without a `Created` task are skipped.
    pub fn schedule<'a>(
        &mut self,
        keys: impl IntoIterator<Item = &'a BlockKey<T>>,
    ) -> Vec<(WorkUnit, BlockPriority)> {
        let mut units = Vec::new();
        for key in keys {
            let Some(task) = self.tasks.get_mut(key) else {
                continue;
            };
            if task.state != TaskState::Created {
                continue;
            }
            if let Some(unit) = task.unit.take() {
                task.state = TaskState::Scheduled;
                units.push((unit, task.priority));
            }
        }
        units
    }

    /// `true` if the task for `key` exists and was created under `tag`.
    pub fn is_current(&self, key: &BlockKey<T>, tag: u64) -> bool {
        self.tasks.get(key).is_some_and(|task| task.tag == tag)
    }

    /// Marks a scheduled task as running and returns its token, or `None` if
    /// the task is gone, superseded or already cancelled.
    pub fn start(&mut self, key: &BlockKey<T>, tag: u64) -> Option<CancellationToken> {
        let task = self.tasks.get_mut(key).filter(|task| task.tag == tag)?;
        if task.cancel.is_cancelled() {
            return None;
        }
        ensure_invariant!(
            task.state == TaskState::Scheduled,
            "started task for {key:?} in state {:?}",
            task.state
        );
        task.state = TaskState::Running;
        Some(task.cancel.clone())
    }

    /// Marks a running task as completed. Returns `false` if it is stale.
    pub fn complete(&mut self, key: &BlockKey<T>, tag: u64) -> bool {
        match self.tasks.get_mut(key) {
            Some(task) if task.tag == tag && !task.cancel.is_cancelled() => {
                task.state = TaskState::Completed;
                true
            }
            _ => false,
        }
    }

    /// Removes the task after a generation failure and remembers the key for
    /// a retry on the next scene update.
    pub fn record_failure(&mut self, key: &BlockKey<T>, tag: u64) -> bool {
        if !self.is_current(key, tag) {
            return false;
        }
        self.tasks.remove(key);
        self.failed.insert(key.clone());
        true
    }

    /// Keys whose generation failed since the last call.
    pub fn take_failed(&mut self) -> Vec<BlockKey<T>> {
        self.failed.drain().collect()
    }

    /// Cancels and removes the task for `key`, returning it in `Interrupted`
    /// state if it had not completed yet.
    pub fn interrupt(&mut self, key: &BlockKey<T>) -> Option<Task> {
        self.failed.remove(key);
        let mut task = self.tasks.remove(key)?;
        task.cancel.cancel();
        if task.state.is_interruptible() {
            task.state = TaskState::Interrupted;
        }
        task.unit = None;
        Some(task)
    }

    /// Removes a finished task.
    pub fn remove(&mut self, key: &BlockKey<T>) -> Option<Task> {
        self.tasks.remove(key)
    }
}
