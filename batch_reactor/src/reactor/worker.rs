//! The dedicated worker thread that drains a reactor.
//!
//! The worker is the only thread that runs item actions, so actions within a
//! reactor never run in parallel. It polls: when both buffers are empty it
//! parks for `no_work_backoff`, and `stop()` unparks it early.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, Thread};
use std::time::Duration;

use super::item::{WorkItem, panic_message};
use super::{BatchCallback, ReactorState, Shared};
use crate::error::ReactorError;
use crate::future::{Completion, Promise};
use crate::observability;

/// A handle to the worker thread, used to wake it from its idle park.
#[derive(Debug)]
pub(crate) struct WorkerHandle {
    thread: Thread,
}

impl WorkerHandle {
    /// Wakes the worker if it is parked waiting for work.
    pub(crate) fn wake(&self) {
        self.thread.unpark();
    }
}

/// Owns the batch callback and drives the drain loop.
pub(crate) struct Worker<C> {
    shared: Arc<Shared<C>>,
    callback: BatchCallback<C>,
}

impl<C: 'static> Worker<C> {
    /// Spawns the worker thread, named after the reactor.
    ///
    /// # Arguments
    ///
    /// * `shared` - State of the reactor this worker drains
    /// * `callback` - The batch callback, owned by the worker from now on
    /// * `started` - Fulfilled from inside the thread once it is running
    ///
    /// # Returns
    ///
    /// A handle used to wake the parked worker, or the spawn error.
    pub(crate) fn start(
        shared: Arc<Shared<C>>,
        callback: BatchCallback<C>,
        started: Promise<()>,
    ) -> io::Result<WorkerHandle> {
        let builder = thread::Builder::new().name(shared.name.clone());
        let handle = builder.spawn(move || {
            let mut worker = Worker { shared, callback };
            worker
                .shared
                .advance(ReactorState::Starting, ReactorState::Running);
            tracing::debug!(reactor = %worker.shared.name, "reactor worker running");
            started.fulfill(());
            worker.run();
        })?;

        Ok(WorkerHandle {
            thread: handle.thread().clone(),
        })
    }

    /// The drain loop.
    ///
    /// Until stop is requested:
    /// 1. Swap in the back buffer if the front one is empty
    /// 2. Park for the backoff if there is still nothing to do
    /// 3. Otherwise dispatch one batch
    ///
    /// Once stop is observed the front buffer is drained, the buffers are
    /// swapped once more and the front is drained again. Admission checks
    /// the stop flag under the buffer lock, so anything admitted before the
    /// flag was set is in a buffer by the time of that final swap.
    fn run(&mut self) {
        let limit = self.shared.options.batch_limit();
        let backoff = self.shared.options.no_work_backoff;

        while !self.shared.is_stopping() {
            let batch = self.shared.buffers.lock().take_batch(limit);
            if batch.is_empty() {
                thread::park_timeout(backoff);
                continue;
            }
            self.process_batch(batch);
        }

        self.process_remaining(limit);
        self.shared.buffers.lock().swap();
        self.process_remaining(limit);
        self.settle_in_flight(limit, backoff);

        self.shared.finish();
    }

    /// Dispatches batches from the front buffer until it is empty.
    fn process_remaining(&mut self, limit: usize) {
        loop {
            let batch = self.shared.buffers.lock().take_front(limit);
            if batch.is_empty() {
                return;
            }
            self.process_batch(batch);
        }
    }

    /// Keeps draining until no batch outcome is outstanding, so items that a
    /// retry policy re-queues after the final swap are still processed.
    fn settle_in_flight(&mut self, limit: usize, backoff: Duration) {
        loop {
            // Read before draining: outcome callbacks re-queue before they
            // decrement, so a zero here means the buffers hold everything.
            let idle = self.shared.in_flight.load(Ordering::Acquire) == 0;
            let batch = self.shared.buffers.lock().take_batch(limit);
            if !batch.is_empty() {
                self.process_batch(batch);
                continue;
            }
            if idle {
                return;
            }
            thread::park_timeout(backoff);
        }
    }

    /// Runs one batch through the callback and arranges for its items to be
    /// settled when the batch outcome is known.
    fn process_batch(&mut self, mut batch: Vec<WorkItem<C>>) {
        let reactor = self.shared.name.as_str();
        metrics::counter!(observability::BATCHES_TOTAL, "reactor" => reactor.to_owned()).increment(1);
        metrics::histogram!(observability::BATCH_SIZE, "reactor" => reactor.to_owned())
            .record(batch.len() as f64);
        tracing::trace!(reactor, size = batch.len(), "dispatching batch");

        let outcome = {
            let mut yielded = false;
            let mut run_all = |context: &mut C| {
                if yielded {
                    tracing::warn!(reactor, "batch context yielded more than once; ignoring");
                    return;
                }
                yielded = true;
                for item in batch.iter_mut() {
                    item.run(context);
                }
            };
            let run: &mut dyn FnMut(&mut C) = &mut run_all;
            let callback = &mut self.callback;
            match panic::catch_unwind(AssertUnwindSafe(|| callback(run))) {
                Ok(outcome) => outcome,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::error!(reactor, panic = %message, "batch callback panicked");
                    Completion::error(ReactorError::batch(format!(
                        "batch callback panicked: {message}"
                    )))
                }
            }
        };

        self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
        metrics::gauge!(observability::BATCHES_IN_FLIGHT, "reactor" => reactor.to_owned()).increment(1.0);

        let shared = Arc::clone(&self.shared);
        outcome.on_complete(move |result| {
            shared.settle_batch(batch, result);
            shared.in_flight.fetch_sub(1, Ordering::AcqRel);
            metrics::gauge!(observability::BATCHES_IN_FLIGHT, "reactor" => shared.name.clone())
                .decrement(1.0);
        });
    }
}
