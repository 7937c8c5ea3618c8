//! A fixed set of reactors addressed by key.
//!
//! Each reactor in a [`ReactorCluster`] is bound to one shard index, and a
//! partitioner maps admission keys to indices. Every item with a given key
//! therefore lands on the same reactor and keeps that reactor's FIFO order.

use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use crate::error::{ReactorError, Result};
use crate::future::Completion;
use crate::reactor::{Reactor, ReactorOptions};

/// `count` reactors sharing one batch callback, parameterised by shard index.
pub struct ReactorCluster<C, K: ?Sized> {
    reactors: Vec<Reactor<C>>,
    partitioner: Option<Box<dyn Fn(&K) -> usize + Send + Sync>>,
}

impl<C: 'static, K: ?Sized> ReactorCluster<C, K> {
    /// Creates `count` reactors named `cluster-<index>`.
    ///
    /// `callback(index, run)` is invoked once per batch of reactor `index`
    /// and follows the single-reactor callback contract.
    pub fn new<F>(count: usize, options: ReactorOptions<C>, callback: F) -> Self
    where
        F: Fn(usize, &mut dyn FnMut(&mut C)) -> Completion<()> + Send + Sync + 'static,
    {
        Self::named("cluster", count, options, callback)
    }

    /// Creates `count` reactors named `<prefix>-<index>`.
    pub fn named<F>(
        prefix: &str,
        count: usize,
        options: ReactorOptions<C>,
        callback: F,
    ) -> Self
    where
        F: Fn(usize, &mut dyn FnMut(&mut C)) -> Completion<()> + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        let reactors = (0..count)
            .map(|index| {
                let callback = Arc::clone(&callback);
                Reactor::named(format!("{prefix}-{index}"), options.clone(), move |run| {
                    callback(index, run)
                })
            })
            .collect();
        tracing::debug!(prefix, count, "reactor cluster created");

        Self {
            reactors,
            partitioner: None,
        }
    }

    /// Registers the key-to-index mapping used by keyed admissions.
    ///
    /// The function must be deterministic. Replaces any earlier partitioner.
    pub fn define_partitioner<P>(&mut self, partitioner: P)
    where
        P: Fn(&K) -> usize + Send + Sync + 'static,
    {
        self.partitioner = Some(Box::new(partitioner));
    }

    /// Starts every reactor; resolves to the reactors in index order, or
    /// fails with the first start error to settle.
    pub fn start(&self) -> Completion<Vec<Reactor<C>>> {
        Completion::all(self.reactors.iter().map(Reactor::start))
    }

    /// Stops every reactor; resolves once all of them have drained.
    pub fn stop(&self) -> Completion<Vec<Reactor<C>>> {
        Completion::all(self.reactors.iter().map(Reactor::stop))
    }

    /// Admits `action` to the reactor that owns `key`.
    ///
    /// Fails with [`ReactorError::PartitionerMissing`] or
    /// [`ReactorError::PartitionOutOfRange`] without admitting anything when
    /// the key cannot be routed.
    pub fn perform_within_batch<T, F>(&self, key: &K, action: F) -> Completion<T>
    where
        T: Send + Sync + 'static,
        F: FnMut(&mut C) -> T + Send + 'static,
    {
        match self.route(key) {
            Ok(reactor) => reactor.perform_within_batch(action),
            Err(error) => Completion::error(error),
        }
    }

    /// Keyed form of [`Reactor::perform_within_batch_deferred`].
    pub fn perform_within_batch_deferred<T, F>(&self, key: &K, action: F) -> Completion<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnMut(&mut C) -> Completion<T> + Send + 'static,
    {
        match self.route(key) {
            Ok(reactor) => reactor.perform_within_batch_deferred(action),
            Err(error) => Completion::error(error),
        }
    }

    fn route(&self, key: &K) -> Result<&Reactor<C>> {
        let index = self.partition_for(key)?;
        Ok(&self.reactors[index])
    }
}

impl<C, K: ?Sized> ReactorCluster<C, K> {
    /// Index of the reactor that owns `key`.
    pub fn partition_for(&self, key: &K) -> Result<usize> {
        let partitioner = self
            .partitioner
            .as_ref()
            .ok_or(ReactorError::PartitionerMissing)?;
        let index = partitioner(key);
        let count = self.reactors.len();
        if index >= count {
            return Err(ReactorError::PartitionOutOfRange { index, count });
        }
        Ok(index)
    }

    /// Number of reactors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.reactors.len()
    }

    /// Returns true for a cluster of zero reactors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reactors.is_empty()
    }

    /// The reactor at `index`, if any.
    #[must_use]
    pub fn reactor(&self, index: usize) -> Option<&Reactor<C>> {
        self.reactors.get(index)
    }

    /// Every reactor in index order.
    #[must_use]
    pub fn reactors(&self) -> &[Reactor<C>] {
        &self.reactors
    }
}

impl<C, K: ?Sized> fmt::Debug for ReactorCluster<C, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactorCluster")
            .field("reactors", &self.reactors)
            .field("partitioner", &self.partitioner.is_some())
            .finish()
    }
}

/// A partitioner spreading keys over `count` shards by their `Hash`.
///
/// Stable for the lifetime of the process.
pub fn hash_partitioner<K>(count: usize) -> impl Fn(&K) -> usize + Send + Sync + 'static
where
    K: Hash + ?Sized + 'static,
{
    let count = count.max(1) as u64;
    move |key: &K| {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % count) as usize
    }
}
