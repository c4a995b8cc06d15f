//! One scene update driver per identity, all sharing one scheduler context.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::Identity;
use crate::context::SchedulerContext;
use crate::driver::SceneUpdateDriver;
use crate::integration::SceneSink;
use crate::key::BlockKey;
use crate::requested::SceneUpdateParams;

/// Streams the blocks of a changing set of identities into one sink.
pub struct SceneStreamer<T, V> {
    context: SchedulerContext<T, V>,
    drivers: FxHashMap<T, SceneUpdateDriver<T, V>>,
    last_params: Option<Arc<SceneUpdateParams>>,
}

impl<T: Identity, V: Send + 'static> SceneStreamer<T, V> {
    pub fn new(context: SchedulerContext<T, V>) -> Self {
        Self {
            context,
            drivers: FxHashMap::default(),
            last_params: None,
        }
    }

    pub fn context(&self) -> &SchedulerContext<T, V> {
        &self.context
    }

    /// Starts streaming `id`. Returns `false` if it is already streamed.
    ///
    /// The new identity immediately receives the most recent scene.
    pub fn add_identity(&mut self, id: T) -> bool {
        if self.drivers.contains_key(&id) {
            return false;
        }
        tracing::debug!(?id, "adding identity");
        let driver = SceneUpdateDriver::new(id.clone(), self.context.clone());
        if let Some(params) = &self.last_params {
            driver.submit(Arc::clone(params));
        }
        self.drivers.insert(id, driver);
        true
    }

    /// Stops streaming `id` and removes its blocks from the sink.
    pub fn remove_identity(&mut self, id: &T) -> bool {
        match self.drivers.remove(id) {
            Some(driver) => {
                tracing::debug!(?id, "removing identity");
                driver.interrupt();
                true
            }
            None => false,
        }
    }

    pub fn remove_all(&mut self) {
        tracing::debug!(count = self.drivers.len(), "removing all identities");
        for (_, driver) in self.drivers.drain() {
            driver.interrupt();
        }
    }

    /// Hands new scene parameters to every driver. Returns immediately.
    pub fn update_scene(&mut self, params: SceneUpdateParams) {
        let params = Arc::new(params);
        for driver in self.drivers.values() {
            driver.submit(Arc::clone(&params));
        }
        self.last_params = Some(params);
    }

    /// Throws away every driver and streams all identities again from
    /// scratch with the last scene parameters.
    pub fn refresh(&mut self) {
        let ids = self.identities();
        tracing::info!(count = ids.len(), "refreshing all identities");
        self.remove_all();
        for id in ids {
            self.add_identity(id);
        }
    }

    pub fn identities(&self) -> Vec<T> {
        self.drivers.keys().cloned().collect()
    }

    pub fn contains(&self, id: &T) -> bool {
        self.drivers.contains_key(id)
    }

    pub fn driver(&self, id: &T) -> Option<&SceneUpdateDriver<T, V>> {
        self.drivers.get(id)
    }

    /// `(num_tasks, num_completed)` summed over all identities.
    pub fn progress(&self) -> (u64, u64) {
        self.drivers.values().fold((0, 0), |(tasks, completed), driver| {
            let (t, c) = driver.progress().get();
            (tasks + t, completed + c)
        })
    }

    /// Runs one integration step on the sink's thread.
    pub fn tick(&self, sink: &mut dyn SceneSink<BlockKey<T>, V>) -> usize {
        self.context.integration.tick(sink)
    }

    /// Interrupts every driver and stops the shared threads.
    pub fn shutdown(&mut self) {
        self.remove_all();
        self.context.shutdown();
    }
}
