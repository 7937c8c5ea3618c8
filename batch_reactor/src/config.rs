//! Declarative reactor configuration.
//!
//! [`ReactorConfig`] mirrors [`ReactorOptions`] in a form that can be read
//! from a config file. Missing fields take the same defaults as the builder,
//! and retry policies are chosen by name.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::reactor::{
    DEFAULT_MAX_BATCH_SIZE, DEFAULT_NO_WORK_BACKOFF, DEFAULT_OVERFLOW_POLL_INTERVAL,
    OverflowPolicy, ReactorOptions,
};
use crate::retry::{Always, Bounded, RetryPolicy};

/// Serializable form of [`ReactorOptions`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactorConfig {
    pub max_batch_size: usize,
    pub max_buffer_size: Option<usize>,
    pub buffer_overflow_handler: OverflowPolicy,
    pub no_work_backoff_ms: u64,
    pub overflow_poll_interval_ms: u64,
    pub retry_policy: Option<RetryPolicyConfig>,
}

/// A built-in retry policy selected by `kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicyConfig {
    /// [`Always`]
    Always,
    /// [`Bounded`]
    Bounded { max_retries: u32 },
}

impl RetryPolicyConfig {
    /// Instantiates the policy.
    #[must_use]
    pub fn build<C>(self) -> Arc<dyn RetryPolicy<C>> {
        match self {
            Self::Always => Arc::new(Always::new()),
            Self::Bounded { max_retries } => Arc::new(Bounded::new(max_retries)),
        }
    }
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_buffer_size: None,
            buffer_overflow_handler: OverflowPolicy::default(),
            no_work_backoff_ms: millis(DEFAULT_NO_WORK_BACKOFF),
            overflow_poll_interval_ms: millis(DEFAULT_OVERFLOW_POLL_INTERVAL),
            retry_policy: None,
        }
    }
}

impl ReactorConfig {
    /// Builds the options a reactor is constructed with.
    #[must_use]
    pub fn into_options<C>(self) -> ReactorOptions<C> {
        let mut options = ReactorOptions::new()
            .with_max_batch_size(self.max_batch_size)
            .with_overflow_policy(self.buffer_overflow_handler)
            .with_no_work_backoff(Duration::from_millis(self.no_work_backoff_ms))
            .with_overflow_poll_interval(Duration::from_millis(self.overflow_poll_interval_ms));
        options.max_buffer_size = self.max_buffer_size;
        if let Some(policy) = self.retry_policy {
            options = options.with_retry_policy(policy.build());
        }
        options
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
