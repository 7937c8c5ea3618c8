use std::sync::atomic::{AtomicU64, Ordering};

use super::RetryPolicy;
use crate::error::ReactorError;
use crate::reactor::WorkItem;

/// Retries every item of every failed batch, indefinitely.
///
/// Never throttles admission. Keeps a running count of retried items.
#[derive(Debug, Default)]
pub struct Always {
    retries: AtomicU64,
}

impl Always {
    /// Creates the policy with a zeroed retry counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of items this policy has queued for retry.
    #[must_use]
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }
}

impl<C> RetryPolicy<C> for Always {
    fn should_retry(&self, _item: &WorkItem<C>, _error: &ReactorError) -> bool {
        true
    }

    fn on_retry(&self, _item: &WorkItem<C>) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::Buffers;

    #[test]
    fn retries_everything_and_counts_it() {
        let policy = Always::new();
        let buffers = Buffers::new("retry-test");
        let batch: Vec<_> = (0..3)
            .map(|_| WorkItem::immediate(|_: &mut ()| ()).0)
            .collect();

        assert!(RetryPolicy::<()>::should_retry(
            &policy,
            &batch[0],
            &ReactorError::batch("down")
        ));
        policy.handle_failed_batch(&buffers, &ReactorError::batch("down"), batch);

        assert_eq!(policy.retries(), 3);
        assert_eq!(buffers.retry_buffer().len(), 3);
        assert!(!RetryPolicy::<()>::should_throttle(&policy));
    }
}
