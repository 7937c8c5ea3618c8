use std::sync::atomic::{AtomicU64, Ordering};

use super::RetryPolicy;
use crate::error::ReactorError;
use crate::reactor::WorkItem;

/// Retries an item at most `max_retries` times, then fails it with the error
/// of the batch that failed last.
#[derive(Debug)]
pub struct Bounded {
    max_retries: u32,
    retries: AtomicU64,
}

impl Bounded {
    /// Creates a policy allowing `max_retries` further attempts per item.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            retries: AtomicU64::new(0),
        }
    }

    /// The per-item retry limit.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Total number of items this policy has queued for retry.
    #[must_use]
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }
}

impl<C> RetryPolicy<C> for Bounded {
    fn should_retry(&self, item: &WorkItem<C>, _error: &ReactorError) -> bool {
        item.retry_count() < self.max_retries
    }

    fn on_retry(&self, _item: &WorkItem<C>) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }
}
