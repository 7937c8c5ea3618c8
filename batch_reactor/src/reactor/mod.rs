//! The batch reactor.
//!
//! A [`Reactor`] accepts work from any number of producer threads and hands
//! it, in bounded batches, to a single dedicated worker thread. Producers
//! append to a back buffer; the worker swaps it with the front buffer under
//! the same lock, slices off up to `max_batch_size` items and passes them to
//! the batch callback, which supplies the batch context the items run
//! against.
//!
//! ```text
//! producers ──append──▶ back ─┐
//!                             swap (one lock)
//! worker ◀──take ≤ max── front ◀┘ ◀── retries re-inserted here
//! ```

mod buffer;
mod item;
mod options;
mod worker;

pub use buffer::{Buffers, RetryBuffer};
pub use item::WorkItem;
pub use options::{
    DEFAULT_MAX_BATCH_SIZE, DEFAULT_NO_WORK_BACKOFF, DEFAULT_OVERFLOW_POLL_INTERVAL,
    OverflowPolicy, ReactorOptions,
};

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::thread;

use parking_lot::Mutex;

use self::buffer::DoubleBuffer;
use self::worker::{Worker, WorkerHandle};
use crate::error::{ReactorError, Result};
use crate::future::{Completion, Promise};
use crate::observability;

static NEXT_REACTOR_ID: AtomicUsize = AtomicUsize::new(0);

/// Invoked once per batch on the worker thread.
///
/// The callback must call the supplied function synchronously, exactly once,
/// with the batch context; every item of the batch runs against that context
/// before the call returns. The returned completion reports whether the batch
/// as a whole succeeded.
pub type BatchCallback<C> = Box<dyn FnMut(&mut dyn FnMut(&mut C)) -> Completion<()> + Send>;

/// Lifecycle of a reactor. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReactorState {
    /// Constructed; admissions are buffered but nothing drains them.
    Created = 0,
    /// `start()` spawned the worker, which has not reported in yet.
    Starting = 1,
    /// The worker is draining batches.
    Running = 2,
    /// `stop()` was called; remaining work is being drained.
    Stopping = 3,
    /// Every admitted item has been settled and the worker has exited.
    Stopped = 4,
}

impl ReactorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// State shared by every handle and the worker thread.
pub(crate) struct Shared<C> {
    name: String,
    options: ReactorOptions<C>,
    buffers: Buffers<C>,
    stopping: AtomicBool,
    state: AtomicU8,
    in_flight: AtomicUsize,
    lifecycle: Mutex<Lifecycle<C>>,
    stopped: Completion<()>,
}

struct Lifecycle<C> {
    callback: Option<BatchCallback<C>>,
    stopped: Option<Promise<()>>,
    started: Option<Completion<()>>,
    worker: Option<WorkerHandle>,
}

impl<C> Shared<C> {
    fn state(&self) -> ReactorState {
        ReactorState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ReactorState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn advance(&self, from: ReactorState, to: ReactorState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Reason the back buffer cannot take another item right now.
    fn refusal(&self, buffers: &DoubleBuffer<C>) -> Option<&'static str> {
        if self
            .options
            .max_buffer_size
            .is_some_and(|max| buffers.back.len() >= max)
        {
            return Some("overflow");
        }
        if self
            .options
            .retry_policy
            .as_ref()
            .is_some_and(|policy| policy.should_throttle())
        {
            return Some("throttled");
        }
        None
    }

    fn reject(&self, item: WorkItem<C>, error: ReactorError, reason: &'static str) {
        metrics::counter!(
            observability::ADMISSIONS_REJECTED_TOTAL,
            "reactor" => self.name.clone(),
            "reason" => reason
        )
        .increment(1);
        tracing::warn!(reactor = %self.name, reason, "admission rejected");
        item.fail(error);
    }

    /// Settles every item of a batch once its outcome is known.
    fn settle_batch(&self, batch: Vec<WorkItem<C>>, outcome: &Result<()>) {
        let error = match outcome {
            Ok(()) => {
                for item in batch {
                    item.complete();
                }
                return;
            }
            Err(error) => error,
        };

        metrics::counter!(observability::BATCH_FAILURES_TOTAL, "reactor" => self.name.clone())
            .increment(1);
        tracing::warn!(reactor = %self.name, size = batch.len(), %error, "batch failed");

        let Some(policy) = &self.options.retry_policy else {
            for item in batch {
                item.fail(error.clone());
            }
            return;
        };

        let name = self.name.clone();
        policy
            .handle_failed_batch(&self.buffers, error, batch)
            .on_complete(move |handled| match handled {
                Err(error) if error.is_retry_sentinel() => {}
                Err(error) => {
                    tracing::warn!(reactor = %name, %error, "retry policy reported an error after disposing of the batch");
                }
                Ok(()) => {
                    tracing::warn!(reactor = %name, "retry policy resolved without handing back the batch");
                }
            });
    }

    /// Marks the reactor stopped and releases everyone waiting on `stop()`.
    fn finish(&self) {
        self.set_state(ReactorState::Stopped);
        let stopped = self.lifecycle.lock().stopped.take();
        if let Some(promise) = stopped {
            promise.fulfill(());
        }
        tracing::debug!(reactor = %self.name, "reactor stopped");
    }
}

/// Coalesces work from many producers into batches run on one worker thread.
///
/// `Reactor` is a cheap handle; clones refer to the same reactor and compare
/// equal. The worker keeps the reactor alive until [`stop`](Self::stop) has
/// drained it, so a started reactor must be stopped explicitly.
pub struct Reactor<C> {
    shared: Arc<Shared<C>>,
}

impl<C: 'static> Reactor<C> {
    /// Creates a reactor named `reactor-<n>`.
    pub fn new<F>(options: ReactorOptions<C>, callback: F) -> Self
    where
        F: FnMut(&mut dyn FnMut(&mut C)) -> Completion<()> + Send + 'static,
    {
        let id = NEXT_REACTOR_ID.fetch_add(1, Ordering::Relaxed);
        Self::named(format!("reactor-{id}"), options, callback)
    }

    /// Creates a reactor with an explicit name.
    ///
    /// Nothing is spawned until [`start`](Self::start); items admitted before
    /// then are buffered.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the worker thread, and the `reactor` label on logs and metrics
    /// * `options` - Batch size, buffer bound, backoff and retry policy
    /// * `callback` - Invoked once per batch on the worker; see [`BatchCallback`]
    ///
    /// # Returns
    ///
    /// A handle in [`ReactorState::Created`]. Clones share the same reactor.
    pub fn named<F>(name: impl Into<String>, options: ReactorOptions<C>, callback: F) -> Self
    where
        F: FnMut(&mut dyn FnMut(&mut C)) -> Completion<()> + Send + 'static,
    {
        let name = name.into();
        let stopped = Promise::new();
        let shared = Shared {
            buffers: Buffers::new(name.clone()),
            name,
            options,
            stopping: AtomicBool::new(false),
            state: AtomicU8::new(ReactorState::Created as u8),
            in_flight: AtomicUsize::new(0),
            stopped: stopped.completion(),
            lifecycle: Mutex::new(Lifecycle {
                callback: Some(Box::new(callback)),
                stopped: Some(stopped),
                started: None,
                worker: None,
            }),
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Launches the worker thread.
    ///
    /// Resolves to this reactor once the worker is running. Calling it again
    /// spawns nothing and resolves with the first call. After `stop()` has
    /// been called the result is [`ReactorError::Stopped`].
    pub fn start(&self) -> Completion<Self> {
        let started = {
            let mut lifecycle = self.shared.lifecycle.lock();
            if self.shared.is_stopping() {
                return Completion::error(ReactorError::Stopped);
            }
            match &lifecycle.started {
                Some(started) => started.clone(),
                None => {
                    let started = self.launch(&mut lifecycle);
                    lifecycle.started = Some(started.clone());
                    started
                }
            }
        };
        self.resolve_with_self(&started)
    }

    fn launch(&self, lifecycle: &mut Lifecycle<C>) -> Completion<()> {
        let Some(callback) = lifecycle.callback.take() else {
            return Completion::error(ReactorError::Stopped);
        };

        self.shared.set_state(ReactorState::Starting);
        let started = Promise::new();
        let completion = started.completion();
        match Worker::start(Arc::clone(&self.shared), callback, started) {
            Ok(handle) => {
                tracing::debug!(reactor = %self.shared.name, "reactor worker spawned");
                lifecycle.worker = Some(handle);
                completion
            }
            Err(error) => {
                tracing::error!(reactor = %self.shared.name, %error, "failed to spawn reactor worker");
                self.shared.set_state(ReactorState::Created);
                Completion::error(error.into())
            }
        }
    }

    /// Stops admitting work and drains what was admitted.
    ///
    /// Resolves to this reactor once every item admitted before the call, or
    /// racing it, has been run and its batch settled. Idempotent.
    pub fn stop(&self) -> Completion<Self> {
        {
            // Taken under the admission lock: an admission either lands in
            // the back buffer before the worker's final swap or sees the flag.
            let _buffers = self.shared.buffers.lock();
            self.shared.stopping.store(true, Ordering::Release);
        }

        let never_started = {
            let mut lifecycle = self.shared.lifecycle.lock();
            match &lifecycle.worker {
                Some(worker) => {
                    let advanced = self
                        .shared
                        .advance(ReactorState::Running, ReactorState::Stopping)
                        || self
                            .shared
                            .advance(ReactorState::Starting, ReactorState::Stopping);
                    if advanced {
                        tracing::debug!(reactor = %self.shared.name, "reactor stopping");
                    }
                    worker.wake();
                    None
                }
                None => lifecycle.stopped.take(),
            }
        };

        if let Some(stopped) = never_started {
            // Nothing will ever drain the buffers.
            let stranded = self.shared.buffers.lock().drain_all();
            for item in stranded {
                item.fail(ReactorError::Stopped);
            }
            self.shared.set_state(ReactorState::Stopped);
            tracing::debug!(reactor = %self.shared.name, "reactor stopped before it was started");
            stopped.fulfill(());
        }

        self.resolve_with_self(&self.shared.stopped)
    }

    /// Admits `action` to run in a future batch.
    ///
    /// The returned completion resolves to the action's return value once the
    /// batch succeeds, or fails with the batch error. Admission is refused
    /// with [`ReactorError::Stopped`] once `stop()` has begun, and with
    /// [`ReactorError::BufferOverflow`] when the back buffer is full under
    /// [`OverflowPolicy::Error`]. Under [`OverflowPolicy::Wait`] the calling
    /// thread blocks until there is room.
    ///
    /// The action may run more than once if a retry policy re-queues it.
    pub fn perform_within_batch<T, F>(&self, action: F) -> Completion<T>
    where
        T: Send + Sync + 'static,
        F: FnMut(&mut C) -> T + Send + 'static,
    {
        let (item, completion) = WorkItem::immediate(action);
        self.admit(item);
        completion
    }

    /// Admits an action whose result is itself pending.
    ///
    /// Once the batch succeeds the returned completion follows the nested
    /// one, settling with its value or error.
    pub fn perform_within_batch_deferred<T, F>(&self, action: F) -> Completion<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnMut(&mut C) -> Completion<T> + Send + 'static,
    {
        let (item, completion) = WorkItem::deferred(action);
        self.admit(item);
        completion
    }

    fn admit(&self, item: WorkItem<C>) {
        let shared = &self.shared;
        loop {
            let mut buffers = shared.buffers.lock();
            if shared.is_stopping() {
                drop(buffers);
                shared.reject(item, ReactorError::Stopped, "stopped");
                return;
            }
            match shared.refusal(&buffers) {
                None => {
                    buffers.back.push_back(item);
                    drop(buffers);
                    metrics::counter!(
                        observability::ITEMS_ADMITTED_TOTAL,
                        "reactor" => shared.name.clone()
                    )
                    .increment(1);
                    return;
                }
                Some(reason) => {
                    drop(buffers);
                    if shared.options.buffer_overflow_handler == OverflowPolicy::Error {
                        shared.reject(item, ReactorError::BufferOverflow, reason);
                        return;
                    }
                    thread::sleep(shared.options.overflow_poll_interval);
                }
            }
        }
    }

    fn resolve_with_self(&self, signal: &Completion<()>) -> Completion<Self> {
        let promise = Promise::new();
        let resolved = promise.completion();
        let reactor = self.clone();
        signal.on_complete(move |result| promise.settle(result.clone().map(|()| reactor)));
        resolved
    }
}

impl<C> Reactor<C> {
    /// The reactor's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ReactorState {
        self.shared.state()
    }

    /// Items admitted but not yet taken into a batch, including retries.
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.shared.buffers.lock().len()
    }

    /// Options the reactor was built with.
    #[must_use]
    pub fn options(&self) -> &ReactorOptions<C> {
        &self.shared.options
    }
}

impl<C> Clone for Reactor<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C> PartialEq for Reactor<C> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<C> Eq for Reactor<C> {}

impl<C> fmt::Debug for Reactor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("name", &self.shared.name)
            .field("state", &self.shared.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn collecting(results: Arc<Mutex<Vec<Vec<u32>>>>) -> impl FnMut(&mut dyn FnMut(&mut Vec<u32>)) -> Completion<()> + Send + 'static {
        move |run| {
            let mut batch = Vec::new();
            run(&mut batch);
            results.lock().push(batch);
            Completion::value(())
        }
    }

    #[test]
    fn test_state_transitions() {
        let reactor = Reactor::new(ReactorOptions::new(), collecting(Arc::default()));
        assert_eq!(reactor.state(), ReactorState::Created);

        reactor.start().wait().unwrap();
        assert_eq!(reactor.state(), ReactorState::Running);

        reactor.stop().wait().unwrap();
        assert_eq!(reactor.state(), ReactorState::Stopped);
    }

    #[test]
    fn test_start_resolves_to_the_same_reactor() {
        let reactor = Reactor::named("named", ReactorOptions::new(), collecting(Arc::default()));
        let first = reactor.start().wait().unwrap();
        let second = reactor.start().wait().unwrap();
        assert_eq!(first, reactor);
        assert_eq!(second, reactor);
        assert_eq!(reactor.name(), "named");
        reactor.stop().wait().unwrap();
    }

    #[test]
    fn test_stop_without_start_fails_buffered_work() {
        let reactor = Reactor::new(ReactorOptions::new(), collecting(Arc::default()));
        let pending = reactor.perform_within_batch(|batch| batch.push(1));
        assert_eq!(reactor.backlog(), 1);

        assert_eq!(reactor.stop().wait().unwrap(), reactor);
        assert!(matches!(pending.wait(), Err(ReactorError::Stopped)));
        assert!(matches!(reactor.start().wait(), Err(ReactorError::Stopped)));
    }

    #[test]
    fn test_restart_after_stop_is_refused() {
        let reactor = Reactor::new(ReactorOptions::new(), collecting(Arc::default()));
        reactor.start().wait().unwrap();
        reactor.stop().wait().unwrap();

        assert_eq!(reactor.state(), ReactorState::Stopped);
        let restarted = reactor.start();
        assert!(restarted.is_settled());
        assert!(matches!(restarted.wait(), Err(ReactorError::Stopped)));
    }

    #[test]
    fn test_idle_worker_picks_up_work_within_a_backoff() {
        let results = Arc::new(Mutex::new(Vec::new()));
        let options = ReactorOptions::new().with_no_work_backoff(Duration::from_millis(5));
        let reactor = Reactor::new(options, collecting(results.clone()));
        reactor.start().wait().unwrap();

        thread::sleep(Duration::from_millis(20));
        let done = reactor.perform_within_batch(|batch| batch.push(7));
        assert!(done.wait_timeout(Duration::from_secs(5)).is_some());
        assert_eq!(*results.lock(), vec![vec![7]]);
        reactor.stop().wait().unwrap();
    }
}
