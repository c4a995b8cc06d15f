//! Collaborators the scheduler drives: the spatial index and the generation
//! engine, plus the token used to cancel generation cooperatively.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::GenerationError;
use crate::key::{BlockInterval, BlockKey};

/// Cooperative cancellation flag shared between the scheduler and a running
/// generation call.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// `Err(Interrupted)` once cancelled, for use with `?` inside engines.
    pub fn check(&self) -> Result<(), GenerationError> {
        if self.is_cancelled() {
            Err(GenerationError::Interrupted)
        } else {
            Ok(())
        }
    }
}

/// Lists the blocks of an identity at each resolution level.
///
/// May be called concurrently for different levels.
pub trait SpatialIndex<T>: Send + Sync {
    /// Number of resolution levels. Level 0 is the finest.
    fn num_levels(&self) -> u32;

    /// Intervals (in the level's cell space) containing data for `id`.
    fn blocks_for(&self, level: u32, id: &T) -> Vec<BlockInterval>;

    /// Aborts any in-flight lookup for `id`.
    fn interrupt_for(&self, _id: &T) {}
}

/// Turns a block into a renderable payload.
///
/// Called concurrently for distinct keys. Implementations should poll
/// `cancel` and return [`GenerationError::Interrupted`] promptly once it is set.
pub trait GenerationEngine<T>: Send + Sync {
    type Payload: Send + 'static;

    /// `Ok(None)` means the block is empty.
    fn generate(
        &self,
        key: &BlockKey<T>,
        cancel: &CancellationToken,
    ) -> Result<Option<Self::Payload>, GenerationError>;

    /// Extra interruption hook for engines with their own bookkeeping.
    fn interrupt_for(&self, _key: &BlockKey<T>) {}
}
