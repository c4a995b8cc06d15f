//! Paced hand-off of generated payloads to a single-threaded scene sink.
//!
//! Workers enqueue payloads from any thread; the thread that owns the sink
//! calls [`ResultIntegrationQueue::tick`] once per frame. Each tick first
//! applies every pending [`SinkCommand`] as one batch, then adds at most
//! `items_per_tick` payloads (nearest first), then fires their callbacks.

use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::key::BlockPriority;
use crate::priority_queue::IndexedPriorityQueue;

/// The render/scene side. Only ever called from the thread running `tick`.
pub trait SceneSink<K, V> {
    /// Adds a payload. Payloads always arrive hidden.
    fn add(&mut self, key: K, payload: V, visible: bool);
    fn remove(&mut self, key: &K);
    fn set_visible(&mut self, key: &K, visible: bool);
}

/// Visibility and removal changes queued for the sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkCommand<K> {
    Remove(K),
    SetVisible(K, bool),
}

/// Invoked once the payload is in the sink.
pub type IntegrationCallback = Box<dyn FnOnce() + Send + 'static>;

struct Waiting<V> {
    payload: V,
    on_integrated: IntegrationCallback,
}

struct QueueState<K, V, P> {
    queue: IndexedPriorityQueue<K, P>,
    waiting: FxHashMap<K, Waiting<V>>,
    commands: Vec<SinkCommand<K>>,
    last_batch: Option<Instant>,
}

/// Priority-ordered buffer between worker completion and the sink.
pub struct ResultIntegrationQueue<K, V, P = BlockPriority> {
    state: Mutex<QueueState<K, V, P>>,
    items_per_tick: usize,
    frame_delay: Duration,
}

impl<K, V, P> ResultIntegrationQueue<K, V, P>
where
    K: Clone + Eq + Hash,
    P: Ord,
{
    pub fn new(items_per_tick: usize, frame_delay: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: IndexedPriorityQueue::new(),
                waiting: FxHashMap::default(),
                commands: Vec::new(),
                last_batch: None,
            }),
            items_per_tick: items_per_tick.max(1),
            frame_delay,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<K, V, P>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueues a payload. A payload already waiting under the same key is
    /// replaced together with its callback.
    pub fn add_to_queue(
        &self,
        key: K,
        payload: V,
        on_integrated: impl FnOnce() + Send + 'static,
        priority: P,
    ) {
        let mut state = self.lock();
        state.queue.push_or_update(key.clone(), priority);
        state.waiting.insert(
            key,
            Waiting {
                payload,
                on_integrated: Box::new(on_integrated),
            },
        );
    }

    /// Withdraws a payload that has not reached the sink yet.
    ///
    /// Returns `true` if it was still waiting. Its callback is dropped unrun.
    pub fn remove_from_queue(&self, key: &K) -> bool {
        let mut state = self.lock();
        state.waiting.remove(key);
        state.queue.remove(key).is_some()
    }

    pub fn update_priority(&self, key: &K, priority: P) -> bool {
        self.lock().queue.update(key, priority)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.lock().queue.contains(key)
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` when there is neither a payload nor a command left to apply.
    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.queue.is_empty() && state.commands.is_empty()
    }

    /// Queues sink commands. They are applied together at the next tick.
    pub fn push_commands(&self, commands: impl IntoIterator<Item = SinkCommand<K>>) {
        self.lock().commands.extend(commands);
    }

    /// Applies pending commands, then integrates the next batch of payloads.
    ///
    /// Returns the number of payloads added to the sink.
    pub fn tick(&self, sink: &mut dyn SceneSink<K, V>) -> usize {
        let now = Instant::now();
        let (commands, batch) = {
            let mut state = self.lock();
            let commands = std::mem::take(&mut state.commands);
            let paced = state
                .last_batch
                .is_some_and(|last| now.duration_since(last) < self.frame_delay);
            let mut batch = Vec::new();
            if !paced {
                while batch.len() < self.items_per_tick {
                    let Some((key, _)) = state.queue.pop() else {
                        break;
                    };
                    if let Some(waiting) = state.waiting.remove(&key) {
                        batch.push((key, waiting));
                    }
                }
                if !batch.is_empty() {
                    state.last_batch = Some(now);
                }
            }
            (commands, batch)
        };

        for command in commands {
            match command {
                SinkCommand::Remove(key) => sink.remove(&key),
                SinkCommand::SetVisible(key, visible) => sink.set_visible(&key, visible),
            }
        }

        let added = batch.len();
        let mut callbacks = Vec::with_capacity(added);
        for (key, waiting) in batch {
            sink.add(key, waiting.payload, false);
            callbacks.push(waiting.on_integrated);
        }
        for callback in callbacks {
            callback();
        }
        added
    }
}
