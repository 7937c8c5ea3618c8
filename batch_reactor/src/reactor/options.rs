//! Reactor configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Default number of items handed to one batch callback invocation.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;
/// Default worker sleep when both buffers are empty.
pub const DEFAULT_NO_WORK_BACKOFF: Duration = Duration::from_millis(100);
/// Default poll interval of producers blocked by the `Wait` overflow policy.
pub const DEFAULT_OVERFLOW_POLL_INTERVAL: Duration = Duration::from_millis(300);

/// What admission does once the back buffer reaches `max_buffer_size`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Refuse the admission with [`ReactorError::BufferOverflow`](crate::ReactorError::BufferOverflow).
    #[default]
    Error,
    /// Block the producer, polling until capacity frees.
    Wait,
}

/// Options for a [`Reactor`](crate::Reactor).
pub struct ReactorOptions<C> {
    /// Upper bound on items per batch. Always at least 1.
    pub max_batch_size: usize,
    /// Capacity of the back buffer; `None` is unbounded.
    pub max_buffer_size: Option<usize>,
    /// Behaviour once the back buffer is full.
    pub buffer_overflow_handler: OverflowPolicy,
    /// Worker sleep when there is nothing to drain.
    pub no_work_backoff: Duration,
    /// Poll interval of producers waiting for capacity.
    pub overflow_poll_interval: Duration,
    /// Opt-in retry of failed batches.
    pub retry_policy: Option<Arc<dyn RetryPolicy<C>>>,
}

impl<C> ReactorOptions<C> {
    /// Options with every default applied.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_buffer_size: None,
            buffer_overflow_handler: OverflowPolicy::Error,
            no_work_backoff: DEFAULT_NO_WORK_BACKOFF,
            overflow_poll_interval: DEFAULT_OVERFLOW_POLL_INTERVAL,
            retry_policy: None,
        }
    }

    /// Sets the maximum batch size, clamped to at least 1.
    #[must_use]
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size.max(1);
        self
    }

    /// Bounds the back buffer.
    #[must_use]
    pub fn with_max_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.max_buffer_size = Some(max_buffer_size);
        self
    }

    /// Sets the overflow policy.
    #[must_use]
    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.buffer_overflow_handler = policy;
        self
    }

    /// Sets the idle backoff of the worker.
    #[must_use]
    pub fn with_no_work_backoff(mut self, backoff: Duration) -> Self {
        self.no_work_backoff = backoff;
        self
    }

    /// Sets the poll interval used under [`OverflowPolicy::Wait`].
    #[must_use]
    pub fn with_overflow_poll_interval(mut self, interval: Duration) -> Self {
        self.overflow_poll_interval = interval;
        self
    }

    /// Installs a retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: Arc<dyn RetryPolicy<C>>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub(crate) fn batch_limit(&self) -> usize {
        self.max_batch_size.max(1)
    }
}

impl<C> Default for ReactorOptions<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Clone for ReactorOptions<C> {
    fn clone(&self) -> Self {
        Self {
            max_batch_size: self.max_batch_size,
            max_buffer_size: self.max_buffer_size,
            buffer_overflow_handler: self.buffer_overflow_handler,
            no_work_backoff: self.no_work_backoff,
            overflow_poll_interval: self.overflow_poll_interval,
            retry_policy: self.retry_policy.clone(),
        }
    }
}

impl<C> fmt::Debug for ReactorOptions<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactorOptions")
            .field("max_batch_size", &self.max_batch_size)
            .field("max_buffer_size", &self.max_buffer_size)
            .field("buffer_overflow_handler", &self.buffer_overflow_handler)
            .field("no_work_backoff", &self.no_work_backoff)
            .field("overflow_poll_interval", &self.overflow_poll_interval)
            .field("retry_policy", &self.retry_policy.is_some())
            .finish()
    }
}
