//! Errors surfaced through reactor completions.

use std::error::Error;
use std::sync::Arc;

/// An external error shared by every item of a failed batch.
pub type SharedError = Arc<dyn Error + Send + Sync + 'static>;

/// Result alias used by completions and reactor operations.
pub type Result<T, E = ReactorError> = std::result::Result<T, E>;

/// Errors delivered to callers through a [`Completion`](crate::Completion).
///
/// The type is `Clone` because a single batch failure fans out to every item
/// that took part in the batch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReactorError {
    /// Admission was attempted after `stop()` began.
    #[error("Reactor stopped!")]
    Stopped,

    /// Admission was refused because the back buffer is full, or because the
    /// retry policy asked for throttling.
    #[error("Buffer overflow!")]
    BufferOverflow,

    /// The batch callback reported a failure for the whole batch.
    #[error("{0}")]
    Batch(SharedError),

    /// A nested async result produced by an item's action failed.
    #[error("{0}")]
    Item(SharedError),

    /// The batch callback returned without yielding a batch context, so the
    /// item's action never ran.
    #[error("batch callback did not yield a batch context")]
    BatchNotYielded,

    /// The item's action panicked while running against the batch context.
    #[error("batch action panicked: {0}")]
    ActionPanicked(String),

    /// The promise was dropped before it was settled.
    #[error("promise dropped before it was settled")]
    Abandoned,

    /// A keyed admission reached a cluster with no partitioner defined.
    #[error("no partitioner defined for reactor cluster")]
    PartitionerMissing,

    /// The partitioner produced an index outside the cluster.
    #[error("partition {index} out of range for a cluster of {count} reactors")]
    PartitionOutOfRange {
        /// Index returned by the partitioner.
        index: usize,
        /// Number of reactors in the cluster.
        count: usize,
    },

    /// The dedicated worker thread could not be spawned.
    #[error("failed to spawn reactor worker: {0}")]
    Spawn(Arc<std::io::Error>),

    /// Marker returned by a retry policy once it has taken ownership of a
    /// failed batch. Never delivered to an item.
    #[error("batch handed over to retry policy")]
    BatchRetried,
}

impl ReactorError {
    /// Wraps an external error as a batch failure.
    pub fn batch<E>(error: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        Self::Batch(Arc::from(error.into()))
    }

    /// Wraps an external error as the failure of a single item.
    pub fn item<E>(error: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        Self::Item(Arc::from(error.into()))
    }

    /// Returns true for the retry hand-over marker.
    #[must_use]
    pub fn is_retry_sentinel(&self) -> bool {
        matches!(self, Self::BatchRetried)
    }

    /// Returns true when the error refused admission rather than reporting on
    /// work that ran.
    #[must_use]
    pub fn is_admission_rejected(&self) -> bool {
        matches!(self, Self::Stopped | Self::BufferOverflow)
    }
}

impl From<std::io::Error> for ReactorError {
    fn from(error: std::io::Error) -> Self {
        Self::Spawn(Arc::new(error))
    }
}
