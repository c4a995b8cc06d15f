//! Shared machinery every scene update driver plugs into.

use std::sync::Arc;
use std::time::Duration;

use crate::Identity;
use crate::engine::{GenerationEngine, SpatialIndex};
use crate::executor::{PriorityTaskExecutor, default_worker_threads};
use crate::integration::ResultIntegrationQueue;
use crate::key::{BlockKey, BlockPriority};
use crate::manager::ManagerExecutor;

/// Tuning for the worker pool, the manager thread and the integration queue.
#[derive(Clone, Debug)]
pub struct SchedulerOptions {
    /// Generation worker count. `0` picks [`default_worker_threads`].
    pub worker_threads: usize,
    pub worker_thread_name: String,
    pub manager_thread_name: String,
    /// Payloads handed to the sink per tick.
    pub items_per_tick: usize,
    /// Minimum time between two integration batches.
    pub frame_delay: Duration,
    /// Run whole-state consistency checks after every mutation, even in
    /// release builds.
    pub check_invariants: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            worker_thread_name: "lodstream-worker".to_string(),
            manager_thread_name: "lodstream-manager".to_string(),
            items_per_tick: 16,
            frame_delay: Duration::ZERO,
            check_invariants: cfg!(debug_assertions),
        }
    }
}

/// Worker pool, integration queue, manager and collaborators, shared by all
/// drivers of one streamer.
pub struct SchedulerContext<T, V> {
    pub workers: Arc<PriorityTaskExecutor<BlockPriority>>,
    pub integration: Arc<ResultIntegrationQueue<BlockKey<T>, V>>,
    pub manager: Arc<ManagerExecutor>,
    pub engine: Arc<dyn GenerationEngine<T, Payload = V>>,
    pub index: Arc<dyn SpatialIndex<T>>,
    pub check_invariants: bool,
}

impl<T, V> Clone for SchedulerContext<T, V> {
    fn clone(&self) -> Self {
        Self {
            workers: Arc::clone(&self.workers),
            integration: Arc::clone(&self.integration),
            manager: Arc::clone(&self.manager),
            engine: Arc::clone(&self.engine),
            index: Arc::clone(&self.index),
            check_invariants: self.check_invariants,
        }
    }
}

impl<T: Identity, V: Send + 'static> SchedulerContext<T, V> {
    /// Spawns the worker pool and the manager thread.
    pub fn new(
        engine: Arc<dyn GenerationEngine<T, Payload = V>>,
        index: Arc<dyn SpatialIndex<T>>,
        options: &SchedulerOptions,
    ) -> std::io::Result<Self> {
        let threads = match options.worker_threads {
            0 => default_worker_threads(),
            n => n,
        };
        tracing::info!(
            workers = threads,
            items_per_tick = options.items_per_tick,
            "starting scheduler"
        );
        Ok(Self {
            workers: Arc::new(PriorityTaskExecutor::new(threads, &options.worker_thread_name)?),
            integration: Arc::new(ResultIntegrationQueue::new(
                options.items_per_tick,
                options.frame_delay,
            )),
            manager: Arc::new(ManagerExecutor::spawn(&options.manager_thread_name)?),
            engine,
            index,
            check_invariants: options.check_invariants || cfg!(debug_assertions),
        })
    }

    /// A thread-less context: scene updates run on
    /// [`ManagerExecutor::run_pending`] and generation on
    /// [`PriorityTaskExecutor::run_next`].
    pub fn manual(
        engine: Arc<dyn GenerationEngine<T, Payload = V>>,
        index: Arc<dyn SpatialIndex<T>>,
        items_per_tick: usize,
    ) -> Self {
        Self {
            workers: Arc::new(PriorityTaskExecutor::manual()),
            integration: Arc::new(ResultIntegrationQueue::new(items_per_tick, Duration::ZERO)),
            manager: Arc::new(ManagerExecutor::manual()),
            engine,
            index,
            check_invariants: true,
        }
    }

    /// Stops the manager and the worker pool. Queued work is dropped.
    pub fn shutdown(&self) {
        self.manager.shutdown();
        self.workers.shutdown();
    }
}
