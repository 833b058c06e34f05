//! Shared error countdown
//!
//! Every worker thread holds the same `ErrorLatch`. A worker that hits an
//! unrecoverable error counts the latch down once; every worker reads it
//! once per iteration and stops when the remaining count has dropped below
//! the number of threads it was started with.
//!
//! # Memory Ordering
//!
//! The count only ever decreases. Decrements use AcqRel and reads use
//! Acquire so a worker that observes a decrement also observes everything
//! the failing thread did before counting down.

use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Monotonic, decrement-only countdown shared by all worker threads
#[derive(Debug)]
pub struct ErrorLatch {
    count: AtomicUsize,
}

impl ErrorLatch {
    /// Create a latch starting at `count`
    pub fn new(count: usize) -> Self {
        Self {
            count: AtomicUsize::new(count),
        }
    }

    /// Decrement the latch, saturating at zero
    ///
    /// Returns the remaining count.
    pub fn count_down(&self) -> usize {
        let previous = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
            .unwrap_or(0);
        let remaining = previous.saturating_sub(1);
        debug!(target: "churn::latch", remaining, "Error latch counted down");
        remaining
    }

    /// Current remaining count (non-blocking)
    pub fn get_count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// True once any of `num_threads` workers has counted down
    pub fn should_stop(&self, num_threads: usize) -> bool {
        self.get_count() < num_threads
    }
}
