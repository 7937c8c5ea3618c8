//! The front/back double buffer shared by producers and the worker.

use std::collections::VecDeque;
use std::mem;

use parking_lot::{Mutex, MutexGuard};

use super::item::WorkItem;
use crate::observability;

/// Producers append to `back`; the worker drains `front`. Retried items are
/// re-inserted at the tail of `front`.
pub(crate) struct DoubleBuffer<C> {
    pub(crate) front: VecDeque<WorkItem<C>>,
    pub(crate) back: VecDeque<WorkItem<C>>,
}

impl<C> DoubleBuffer<C> {
    fn new() -> Self {
        Self {
            front: VecDeque::new(),
            back: VecDeque::new(),
        }
    }

    pub(crate) fn swap(&mut self) {
        mem::swap(&mut self.front, &mut self.back);
    }

    /// Takes up to `max` items from the head of the front buffer.
    pub(crate) fn take_front(&mut self, max: usize) -> Vec<WorkItem<C>> {
        let count = max.min(self.front.len());
        self.front.drain(..count).collect()
    }

    /// Swaps in the back buffer if the front one is exhausted, then takes up
    /// to `max` items.
    pub(crate) fn take_batch(&mut self, max: usize) -> Vec<WorkItem<C>> {
        if self.front.is_empty() {
            self.swap();
        }
        self.take_front(max)
    }

    pub(crate) fn len(&self) -> usize {
        self.front.len() + self.back.len()
    }

    pub(crate) fn drain_all(&mut self) -> Vec<WorkItem<C>> {
        self.front.drain(..).chain(self.back.drain(..)).collect()
    }
}

/// The lock guarding admission, buffer swaps and retry re-insertion.
pub struct Buffers<C> {
    inner: Mutex<DoubleBuffer<C>>,
    reactor: String,
}

impl<C> Buffers<C> {
    /// Empty buffers owned by the reactor named `reactor`.
    pub(crate) fn new(reactor: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(DoubleBuffer::new()),
            reactor: reactor.into(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, DoubleBuffer<C>> {
        self.inner.lock()
    }

    /// Locks the buffers and returns the front buffer as a retry target.
    pub fn retry_buffer(&self) -> RetryBuffer<'_, C> {
        RetryBuffer {
            buffers: self.inner.lock(),
            reactor: &self.reactor,
        }
    }
}

/// Locked view of the front buffer used to hand items back for another
/// attempt. Items land behind whatever the worker has not yet taken, so they
/// interleave with fresh admissions swapped in later.
pub struct RetryBuffer<'a, C> {
    buffers: MutexGuard<'a, DoubleBuffer<C>>,
    reactor: &'a str,
}

impl<C> RetryBuffer<'_, C> {
    /// Increments the item's retry count and queues it for a later batch.
    pub fn requeue(&mut self, mut item: WorkItem<C>) {
        item.mark_retried();
        self.buffers.front.push_back(item);
        metrics::counter!(observability::ITEMS_RETRIED_TOTAL, "reactor" => self.reactor.to_owned())
            .increment(1);
    }

    /// Number of items waiting in the front buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.front.len()
    }

    /// Name of the reactor that owns these buffers.
    #[must_use]
    pub fn reactor(&self) -> &str {
        self.reactor
    }

    /// Returns true if the front buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.front.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future::Completion;

    fn item(value: u32) -> (WorkItem<Vec<u32>>, Completion<u32>) {
        WorkItem::immediate(move |batch: &mut Vec<u32>| {
            batch.push(value);
            value
        })
    }

    fn run_all(items: Vec<WorkItem<Vec<u32>>>) -> Vec<u32> {
        let mut batch = Vec::new();
        for mut item in items {
            item.run(&mut batch);
            item.complete();
        }
        batch
    }

    #[test]
    fn batch_is_capped_and_taken_in_admission_order() {
        let buffers = Buffers::new("buffer-test");
        {
            let mut guard = buffers.lock();
            for value in 0..5 {
                guard.back.push_back(item(value).0);
            }
        }

        let first = buffers.lock().take_batch(3);
        assert_eq!(run_all(first), vec![0, 1, 2]);
        let second = buffers.lock().take_batch(3);
        assert_eq!(run_all(second), vec![3, 4]);
        assert!(buffers.lock().take_batch(3).is_empty());
    }

    #[test]
    fn front_is_drained_before_the_back_is_swapped_in() {
        let buffers = Buffers::new("buffer-test");
        {
            let mut guard = buffers.lock();
            guard.front.push_back(item(1).0);
            guard.back.push_back(item(2).0);
        }
        let taken = buffers.lock().take_batch(10);
        assert_eq!(run_all(taken), vec![1]);
        assert_eq!(buffers.lock().len(), 1);
    }

    #[test]
    fn requeue_bumps_the_retry_count_by_one() {
        let buffers = Buffers::new("buffer-test");
        let (work, _completion) = item(9);
        {
            let mut retry = buffers.retry_buffer();
            assert_eq!(retry.reactor(), "buffer-test");
            retry.requeue(work);
            assert_eq!(retry.len(), 1);
        }
        let taken = buffers.lock().take_front(1);
        assert_eq!(taken[0].retry_count(), 1);
    }
}
