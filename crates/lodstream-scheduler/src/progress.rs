//! Block generation progress counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Number of blocks requested by the latest scene update and how many of them
/// are already integrated. Readable from any thread.
#[derive(Debug, Default)]
pub struct BlockProgress {
    num_tasks: AtomicU64,
    num_completed: AtomicU64,
}

impl BlockProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, num_tasks: u64, num_completed: u64) {
        self.num_tasks.store(num_tasks, Ordering::Release);
        self.num_completed.store(num_completed, Ordering::Release);
    }

    pub fn increment_completed(&self) {
        self.num_completed.fetch_add(1, Ordering::AcqRel);
    }

    pub fn num_tasks(&self) -> u64 {
        self.num_tasks.load(Ordering::Acquire)
    }

    pub fn num_completed(&self) -> u64 {
        self.num_completed.load(Ordering::Acquire)
    }

    /// `(num_tasks, num_completed)`.
    pub fn get(&self) -> (u64, u64) {
        (self.num_tasks(), self.num_completed())
    }

    pub fn is_complete(&self) -> bool {
        self.num_completed() >= self.num_tasks()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Completion counts up to the number of tasks.
    #[test]
    fn test_progress_counts_up() {
        let progress = BlockProgress::new();
        progress.set(3, 1);
        assert!(!progress.is_complete());
        progress.increment_completed();
        progress.increment_completed();
        assert_eq!(progress.get(), (3, 3));
        assert!(progress.is_complete());
    }

    /// A reset progress is trivially complete.
    #[test]
    fn test_reset_progress_is_complete() {
        let progress = BlockProgress::new();
        progress.set(0, 0);
        assert!(progress.is_complete());
    }
}
