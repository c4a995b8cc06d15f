//! Scene update driver for one identity.
//!
//! All tree, registry and rendered-set mutation happens under one mutex. Three
//! kinds of events enter it: scene recomputations (coalesced, run on the
//! manager), generation results (worker threads), and integration callbacks
//! (the sink thread). Sink commands produced inside one critical section are
//! handed to the integration queue as one batch, so a swap between levels is
//! applied atomically.
//!
//! Node transitions:
//!
//! ```text
//! PENDING --generated--> RENDERED --integrated--> HIDDEN   (parent VISIBLE)
//!                                              \-> VISIBLE (root or parent REMOVED)
//! all siblings HIDDEN: siblings -> VISIBLE, parent -> REMOVED
//! ```

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashMap;

use crate::Identity;
use crate::context::SchedulerContext;
use crate::diff::{DiffOutcome, merge_requested_tree};
use crate::error::{GenerationError, InvariantViolation};
use crate::executor::{WorkUnit, panic_message};
use crate::integration::SinkCommand;
use crate::invariants::{check_scene_states, check_shared_structure, describe, ensure_invariant, report, report_result};
use crate::key::{BlockKey, BlockPriority};
use crate::progress::BlockProgress;
use crate::registry::TaskRegistry;
use crate::requested::{SceneUpdateParams, build_requested_tree};
use crate::state::{NodeState, TaskState};
use crate::tree::{LiveTree, RequestedTree};

/// Task details exposed by [`DriverSnapshot`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TaskSnapshot {
    pub state: TaskState,
    pub tag: u64,
    pub priority: BlockPriority,
}

/// Point-in-time copy of a driver's state.
#[derive(Clone, Debug)]
pub struct DriverSnapshot<T> {
    pub generation: u64,
    pub live: LiveTree<T>,
    pub requested: RequestedTree<T>,
    /// Rendered blocks; `false` marks an empty payload.
    pub rendered: FxHashMap<BlockKey<T>, bool>,
    pub tasks: FxHashMap<BlockKey<T>, TaskSnapshot>,
}

impl<T: Identity> DriverSnapshot<T> {
    pub fn state_of(&self, key: &BlockKey<T>) -> Option<NodeState> {
        self.live.get(key).map(|node| node.state)
    }

    pub fn keys_in_state(&self, state: NodeState) -> Vec<BlockKey<T>> {
        self.live
            .iter()
            .filter(|(_, node)| node.state == state)
            .map(|(key, _)| key.clone())
            .collect()
    }
}

struct DriverState<T> {
    live: LiveTree<T>,
    requested: RequestedTree<T>,
    rendered: FxHashMap<BlockKey<T>, bool>,
    tasks: TaskRegistry<T>,
    generation: u64,
    commands: Vec<SinkCommand<BlockKey<T>>>,
}

struct DriverShared<T, V> {
    id: T,
    context: SchedulerContext<T, V>,
    state: Mutex<DriverState<T>>,
    pending: Mutex<Option<Arc<SceneUpdateParams>>>,
    interrupted: AtomicBool,
    progress: Arc<BlockProgress>,
}

/// Keeps the blocks of one identity in step with the requested scene.
///
/// Clones are handles to the same driver.
pub struct SceneUpdateDriver<T, V> {
    shared: Arc<DriverShared<T, V>>,
}

impl<T, V> Clone for SceneUpdateDriver<T, V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

fn block_priority<T>(key: &BlockKey<T>, distance_from_camera: f64) -> BlockPriority {
    BlockPriority::new(distance_from_camera, i32::try_from(key.level).unwrap_or(i32::MAX))
}

fn pending_children<T: Identity>(live: &LiveTree<T>, key: &BlockKey<T>) -> Vec<BlockKey<T>> {
    live.get(key)
        .map(|node| {
            node.children
                .iter()
                .filter(|child| live.get(child).is_some_and(|c| c.state == NodeState::Pending))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

impl<T: Identity, V: Send + 'static> SceneUpdateDriver<T, V> {
    pub fn new(id: T, context: SchedulerContext<T, V>) -> Self {
        Self {
            shared: Arc::new(DriverShared {
                id,
                context,
                state: Mutex::new(DriverState {
                    live: LiveTree::new(),
                    requested: RequestedTree::new(),
                    rendered: FxHashMap::default(),
                    tasks: TaskRegistry::new(),
                    generation: 0,
                    commands: Vec::new(),
                }),
                pending: Mutex::new(None),
                interrupted: AtomicBool::new(false),
                progress: Arc::new(BlockProgress::new()),
            }),
        }
    }

    pub fn id(&self) -> &T {
        &self.shared.id
    }

    /// Requests a scene recomputation and returns immediately.
    ///
    /// Requests arriving before the manager gets to the previous one replace
    /// it; at most one recomputation is queued at a time.
    pub fn submit(&self, params: Arc<SceneUpdateParams>) {
        let shared = &self.shared;
        if shared.interrupted.load(Ordering::Acquire) {
            return;
        }
        let was_idle = shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(params)
            .is_none();
        if was_idle && !shared.context.manager.is_shutdown() {
            let weak = Arc::downgrade(shared);
            shared.context.manager.submit(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.update_scene();
                }
            });
        }
    }

    /// Stops the driver for good: removes everything it put into the sink,
    /// cancels all work and ignores further requests.
    pub fn interrupt(&self) {
        self.shared.interrupt();
    }

    pub fn is_interrupted(&self) -> bool {
        self.shared.interrupted.load(Ordering::Acquire)
    }

    pub fn progress(&self) -> Arc<BlockProgress> {
        Arc::clone(&self.shared.progress)
    }

    pub fn snapshot(&self) -> DriverSnapshot<T> {
        let state = self.shared.lock_state();
        DriverSnapshot {
            generation: state.generation,
            live: state.live.clone(),
            requested: state.requested.clone(),
            rendered: state.rendered.clone(),
            tasks: state
                .tasks
                .iter()
                .map(|(key, task)| {
                    (
                        key.clone(),
                        TaskSnapshot {
                            state: task.state,
                            tag: task.tag,
                            priority: task.priority,
                        },
                    )
                })
                .collect(),
        }
    }

    /// Runs every whole-state consistency check on demand.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let state = self.shared.lock_state();
        check_state(&state)
    }
}

fn check_state<T: Identity>(state: &DriverState<T>) -> Result<(), InvariantViolation> {
    check_scene_states(&state.live, &state.rendered, &state.tasks)?;
    check_shared_structure(&state.requested, &state.live)
}

impl<T: Identity, V: Send + 'static> DriverShared<T, V> {
    fn lock_state(&self) -> MutexGuard<'_, DriverState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn interrupt(&self) {
        if self.interrupted.swap(true, Ordering::AcqRel) {
            return;
        }
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let mut guard = self.lock_state();
        let state = &mut *guard;
        tracing::debug!(id = ?self.id, tasks = state.tasks.len(), "interrupting driver");

        let rendered: Vec<_> = state.rendered.keys().cloned().collect();
        for key in &rendered {
            self.evict(state, key);
        }
        self.context.index.interrupt_for(&self.id);
        let keys: Vec<_> = state.tasks.keys().cloned().collect();
        self.interrupt_tasks(state, &keys);
        state.live = LiveTree::new();
        state.requested = RequestedTree::new();
        self.progress.set(0, 0);
        self.flush_commands(state);
    }

    /// Recomputes the requested tree from the latest parameters and brings
    /// the live tree, tasks and queues in line with it.
    fn update_scene(self: &Arc<Self>) {
        if self.interrupted.load(Ordering::Acquire) {
            return;
        }
        let Some(params) = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        let mut guard = self.lock_state();
        let state = &mut *guard;
        if self.interrupted.load(Ordering::Acquire) {
            return;
        }
        state.generation += 1;
        tracing::debug!(id = ?self.id, generation = state.generation, "scene update started");

        let requested = build_requested_tree(&self.id, self.context.index.as_ref(), &params);
        let last_requested = std::mem::replace(&mut state.requested, requested);
        let DiffOutcome {
            mut to_render,
            total_blocks,
            retired,
        } = merge_requested_tree(&mut state.live, &last_requested, &state.requested);

        for key in &retired {
            self.evict(state, key);
        }
        self.interrupt_tasks(state, &retired);

        let dropped: Vec<_> = state
            .rendered
            .keys()
            .filter(|key| !state.live.contains(key))
            .cloned()
            .collect();
        for key in &dropped {
            self.evict(state, key);
        }
        let orphaned: Vec<_> = state
            .tasks
            .keys()
            .filter(|key| !state.live.contains(key))
            .cloned()
            .collect();
        self.interrupt_tasks(state, &orphaned);

        for key in state.tasks.take_failed() {
            let retry = !state.tasks.contains(&key)
                && state.requested.contains(&key)
                && state
                    .live
                    .get(&key)
                    .is_some_and(|node| node.state == NodeState::Pending);
            if retry {
                to_render.insert(key);
            }
        }

        self.reprioritize(state);

        let completed = total_blocks
            .saturating_sub(to_render.len())
            .saturating_sub(state.tasks.len());
        self.progress.set(total_blocks as u64, completed as u64);
        tracing::debug!(
            id = ?self.id,
            total = total_blocks,
            completed,
            new_tasks = to_render.len(),
            rendered = state.rendered.len(),
            "creating generation tasks"
        );

        for key in to_render {
            self.create_task(state, key);
        }

        let mut to_submit = Vec::new();
        let mut queue: VecDeque<BlockKey<T>> = state.live.root_keys().into();
        while let Some(key) = queue.pop_front() {
            let Some(node) = state.live.get(&key) else {
                continue;
            };
            queue.extend(node.children.iter().cloned());
            let node_state = node.state;
            let is_root = node.parent.is_none();
            let children_ready = !node.children.is_empty()
                && node.children.iter().all(|child| {
                    state
                        .live
                        .get(child)
                        .is_some_and(|c| c.state == NodeState::Hidden)
                });

            match node_state {
                NodeState::Pending if is_root => to_submit.push(key),
                NodeState::Visible if children_ready => {
                    self.reveal_children(state, &key, &mut to_submit);
                }
                NodeState::Visible | NodeState::Removed => {
                    to_submit.extend(pending_children(&state.live, &key));
                }
                _ => {}
            }
        }
        self.submit_tasks(state, &to_submit);
        self.finish(state);
        tracing::debug!(id = ?self.id, generation = state.generation, "scene update finished");
    }

    fn create_task(self: &Arc<Self>, state: &mut DriverState<T>, key: BlockKey<T>) {
        let Some(node) = state.live.get(&key) else {
            report(&InvariantViolation::TaskNotInTree {
                key: describe(&key),
            });
            return;
        };
        let priority = block_priority(&key, node.distance_from_camera);
        let tag = state.generation;
        let weak = Arc::downgrade(self);
        let unit_key = key.clone();
        let unit = WorkUnit::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.run_task(&unit_key, tag);
            }
        });
        state.tasks.create(key, unit, priority, tag);
    }

    fn submit_tasks(&self, state: &mut DriverState<T>, keys: &[BlockKey<T>]) {
        if keys.is_empty() {
            return;
        }
        let units = state.tasks.schedule(keys);
        if !units.is_empty() {
            tracing::debug!(id = ?self.id, count = units.len(), "submitting generation tasks");
            self.context.workers.add_or_update_tasks(units);
        }
    }

    /// Cancels tasks cooperatively and withdraws any that have not started.
    fn interrupt_tasks(&self, state: &mut DriverState<T>, keys: &[BlockKey<T>]) {
        if keys.is_empty() {
            return;
        }
        let mut units = Vec::new();
        for key in keys {
            self.context.engine.interrupt_for(key);
            ensure_invariant!(
                !state.rendered.contains_key(key),
                "interrupting the task of rendered block {key:?}"
            );
            if let Some(task) = state.tasks.interrupt(key) {
                units.push(task.unit_id);
            }
        }
        let withdrawn = self.context.workers.remove_tasks(&units);
        tracing::debug!(
            id = ?self.id,
            interrupted = units.len(),
            withdrawn,
            "interrupted generation tasks"
        );
    }

    /// Drops a block from the rendered set and from the sink.
    fn evict(&self, state: &mut DriverState<T>, key: &BlockKey<T>) {
        let Some(has_payload) = state.rendered.remove(key) else {
            return;
        };
        if has_payload && !self.context.integration.remove_from_queue(key) {
            state.commands.push(SinkCommand::Remove(key.clone()));
        }
    }

    fn reprioritize(&self, state: &mut DriverState<T>) {
        let mut updates = Vec::new();
        for (key, task) in state.tasks.iter_mut() {
            if !task.state.is_waiting() {
                continue;
            }
            let Some(node) = state.live.get(key) else {
                continue;
            };
            task.priority = block_priority(key, node.distance_from_camera);
            if task.state == TaskState::Scheduled {
                updates.push((task.unit_id, task.priority));
            }
        }
        self.context.workers.update_priorities(updates);

        for (key, node) in state.live.iter() {
            if node.state == NodeState::Rendered {
                self.context
                    .integration
                    .update_priority(key, block_priority(key, node.distance_from_camera));
            }
        }
    }

    fn run_task(self: &Arc<Self>, key: &BlockKey<T>, tag: u64) {
        let cancel = {
            let mut state = self.lock_state();
            match state.tasks.start(key, tag) {
                Some(cancel) => cancel,
                None => {
                    tracing::debug!(?key, "task was removed before it started");
                    return;
                }
            }
        };

        let result = catch_unwind(AssertUnwindSafe(|| self.context.engine.generate(key, &cancel)))
            .unwrap_or_else(|panic| {
                Err(GenerationError::Failed(format!(
                    "engine panicked: {}",
                    panic_message(&*panic)
                )))
            });

        let mut guard = self.lock_state();
        let state = &mut *guard;
        if cancel.is_cancelled() || !state.tasks.is_current(key, tag) {
            tracing::debug!(?key, "generation was interrupted");
            return;
        }
        match result {
            Ok(payload) => {
                if state.tasks.complete(key, tag) {
                    self.on_block_generated(state, key.clone(), payload, tag);
                }
            }
            Err(GenerationError::Interrupted) => {
                tracing::debug!(?key, "engine aborted generation");
                state.tasks.record_failure(key, tag);
            }
            Err(GenerationError::Failed(reason)) => {
                tracing::warn!(?key, %reason, "block generation failed, will retry on next update");
                state.tasks.record_failure(key, tag);
            }
        }
        self.finish(state);
    }

    fn on_block_generated(
        self: &Arc<Self>,
        state: &mut DriverState<T>,
        key: BlockKey<T>,
        payload: Option<V>,
        tag: u64,
    ) {
        ensure_invariant!(
            !state.rendered.contains_key(&key),
            "generated block {key:?} is already rendered"
        );
        let Some(node) = state.live.get_mut(&key) else {
            report(&InvariantViolation::TaskNotInTree {
                key: describe(&key),
            });
            return;
        };
        ensure_invariant!(
            node.state == NodeState::Pending,
            "generated block {key:?} is in state {}",
            node.state
        );
        node.state = NodeState::Rendered;
        let priority = block_priority(&key, node.distance_from_camera);
        state.rendered.insert(key.clone(), payload.is_some());
        tracing::debug!(?key, empty = payload.is_none(), "block generated");

        match payload {
            Some(payload) => {
                let weak = Arc::downgrade(self);
                let callback_key = key.clone();
                self.context.integration.add_to_queue(
                    key,
                    payload,
                    move || {
                        if let Some(shared) = weak.upgrade() {
                            shared.on_block_integrated(&callback_key, tag);
                        }
                    },
                    priority,
                );
            }
            None => self.integrate(state, &key, tag),
        }
    }

    fn on_block_integrated(self: &Arc<Self>, key: &BlockKey<T>, tag: u64) {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        self.integrate(state, key, tag);
        self.finish(state);
    }

    /// Advances the state machine once a block's payload is in the sink.
    fn integrate(self: &Arc<Self>, state: &mut DriverState<T>, key: &BlockKey<T>, tag: u64) {
        let current = state
            .tasks
            .get(key)
            .is_some_and(|task| task.state == TaskState::Completed && task.tag == tag);
        if !current {
            tracing::debug!(?key, "integrated block is no longer relevant");
            return;
        }
        state.tasks.remove(key);
        self.progress.increment_completed();

        let Some(node) = state.live.get(key) else {
            report(&InvariantViolation::TaskNotInTree {
                key: describe(key),
            });
            return;
        };
        ensure_invariant!(
            node.state == NodeState::Rendered,
            "integrated block {key:?} is in state {}",
            node.state
        );
        let parent_key = node.parent.clone();
        let parent_state = parent_key
            .as_ref()
            .and_then(|parent| state.live.get(parent))
            .map(|parent| parent.state);

        if let (Some(parent_key), Some(NodeState::Visible)) = (&parent_key, parent_state) {
            set_state(&mut state.live, key, NodeState::Hidden);
            let all_hidden = state.live.get(parent_key).is_some_and(|parent| {
                parent.children.iter().all(|sibling| {
                    state
                        .live
                        .get(sibling)
                        .is_some_and(|s| s.state == NodeState::Hidden)
                })
            });
            if all_hidden {
                let mut to_submit = Vec::new();
                self.reveal_children(state, parent_key, &mut to_submit);
                self.submit_tasks(state, &to_submit);
            }
            return;
        }

        if let Some(parent_state) = parent_state {
            ensure_invariant!(
                parent_state == NodeState::Removed,
                "parent of integrated block {key:?} is neither visible nor removed but {parent_state}"
            );
        }
        set_state(&mut state.live, key, NodeState::Visible);
        if state.rendered.get(key) == Some(&true) {
            state.commands.push(SinkCommand::SetVisible(key.clone(), true));
        }

        if state.requested.is_leaf(key) {
            // The coarse block replaces whatever finer subtree was still shown.
            for descendant in state.live.descendants(key) {
                ensure_invariant!(
                    !state.tasks.contains(&descendant),
                    "replaced block {descendant:?} still has a task"
                );
                self.evict(state, &descendant);
                state.live.remove(&descendant);
            }
            if let Some(node) = state.live.get_mut(key) {
                node.children.clear();
            }
        } else {
            let children = pending_children(&state.live, key);
            self.submit_tasks(state, &children);
        }
    }

    /// Shows every child of `parent` and retires `parent`.
    fn reveal_children(&self, state: &mut DriverState<T>, parent: &BlockKey<T>, to_submit: &mut Vec<BlockKey<T>>) {
        let children: Vec<_> = state
            .live
            .get(parent)
            .map(|node| node.children.iter().cloned().collect())
            .unwrap_or_default();
        for child in &children {
            set_state(&mut state.live, child, NodeState::Visible);
            if state.rendered.get(child) == Some(&true) {
                state.commands.push(SinkCommand::SetVisible(child.clone(), true));
            }
        }
        set_state(&mut state.live, parent, NodeState::Removed);
        ensure_invariant!(
            !state.tasks.contains(parent),
            "retired parent {parent:?} still has a task"
        );
        self.evict(state, parent);
        for child in &children {
            to_submit.extend(pending_children(&state.live, child));
        }
        tracing::debug!(?parent, children = children.len(), "finer blocks revealed");
    }

    fn flush_commands(&self, state: &mut DriverState<T>) {
        if !state.commands.is_empty() {
            self.context
                .integration
                .push_commands(std::mem::take(&mut state.commands));
        }
    }

    /// Ends a critical section: hands sink commands over and checks state.
    fn finish(&self, state: &mut DriverState<T>) {
        self.flush_commands(state);
        if self.context.check_invariants {
            report_result(check_state(state));
        }
    }
}

fn set_state<T: Identity>(live: &mut LiveTree<T>, key: &BlockKey<T>, state: NodeState) {
    if let Some(node) = live.get_mut(key) {
        node.state = state;
    }
}
