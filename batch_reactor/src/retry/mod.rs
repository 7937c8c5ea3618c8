//! Opt-in retry of failed batches.
//!
//! Without a policy, a failed batch fails every item in it. With a policy the
//! reactor hands the whole failed batch to [`RetryPolicy::handle_failed_batch`],
//! which decides per item whether to fail it now or queue it for another
//! attempt. A policy can also throttle admission while it is retrying.
//!
//! Retried items are re-inserted behind pending work in the front buffer, so
//! strict admission order is not preserved once retries happen.

mod always;
mod bounded;

pub use always::Always;
pub use bounded::Bounded;

use crate::error::ReactorError;
use crate::future::Completion;
use crate::reactor::{Buffers, WorkItem};

/// Decides what happens to the items of a failed batch.
pub trait RetryPolicy<C>: Send + Sync {
    /// Whether `item` should be attempted again after `error`.
    fn should_retry(&self, item: &WorkItem<C>, error: &ReactorError) -> bool;

    /// While true, admission is refused (or blocked under
    /// [`OverflowPolicy::Wait`](crate::OverflowPolicy::Wait)) as if the buffer
    /// were full.
    fn should_throttle(&self) -> bool {
        false
    }

    /// Called for each item just before it is queued for retry.
    fn on_retry(&self, _item: &WorkItem<C>) {}

    /// Disposes of a failed batch.
    ///
    /// Items rejected by [`should_retry`](Self::should_retry) are failed with
    /// `error` at once. The rest have their retry count incremented and are
    /// appended to the front buffer under the buffer lock. The returned
    /// completion fails with [`ReactorError::BatchRetried`] to tell the
    /// reactor that every item has been taken care of.
    fn handle_failed_batch(
        &self,
        buffers: &Buffers<C>,
        error: &ReactorError,
        batch: Vec<WorkItem<C>>,
    ) -> Completion<()> {
        let (retry, fail): (Vec<_>, Vec<_>) = batch
            .into_iter()
            .partition(|item| self.should_retry(item, error));

        for item in fail {
            item.fail(error.clone());
        }

        if !retry.is_empty() {
            let mut target = buffers.retry_buffer();
            for item in retry {
                self.on_retry(&item);
                target.requeue(item);
            }
        }

        Completion::error(ReactorError::BatchRetried)
    }
}
