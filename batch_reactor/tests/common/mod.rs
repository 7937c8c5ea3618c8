#![allow(dead_code)]
//! Shared integration test utilities.

use std::sync::{Arc, Once};
use std::time::Duration;

use batch_reactor::{Completion, Promise, ReactorError};
use parking_lot::Mutex;

static INIT_LOGGING: Once = Once::new();

/// Generous bound for waits that should finish almost immediately.
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Short idle backoff so tests do not wait out the 100ms default.
pub const FAST_BACKOFF: Duration = Duration::from_millis(2);

/// Routes `tracing` output through the test harness' captured writer.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("batch_reactor=debug")),
            )
            .with_test_writer()
            .with_thread_names(true)
            .with_ansi(false)
            .try_init();
    });
}

/// Every batch context seen by a mock callback, in dispatch order.
pub type Batches<T> = Arc<Mutex<Vec<Vec<T>>>>;

/// A batch callback that records each batch and reports success.
pub fn recording<T>(batches: Batches<T>) -> impl FnMut(&mut dyn FnMut(&mut Vec<T>)) -> Completion<()> + Send + 'static
where
    T: Send + 'static,
{
    move |run| {
        let mut batch = Vec::new();
        run(&mut batch);
        batches.lock().push(batch);
        Completion::value(())
    }
}

/// A batch callback that records each batch and fails it with `message`.
pub fn failing<T>(batches: Batches<T>, message: &'static str) -> impl FnMut(&mut dyn FnMut(&mut Vec<T>)) -> Completion<()> + Send + 'static
where
    T: Send + 'static,
{
    move |run| {
        let mut batch = Vec::new();
        run(&mut batch);
        batches.lock().push(batch);
        Completion::error(ReactorError::batch(message))
    }
}

/// Batch outcomes settled by the test rather than the callback.
///
/// The callback hands out a fresh pending outcome per batch; the test
/// resolves them with [`Outcomes::succeed_next`] or [`Outcomes::fail_next`].
#[derive(Clone, Default)]
pub struct Outcomes {
    pending: Arc<Mutex<Vec<Promise<()>>>>,
}

impl Outcomes {
    pub fn callback<T>(&self, batches: Batches<T>) -> impl FnMut(&mut dyn FnMut(&mut Vec<T>)) -> Completion<()> + Send + 'static
    where
        T: Send + 'static,
    {
        let pending = Arc::clone(&self.pending);
        move |run| {
            let mut batch = Vec::new();
            run(&mut batch);
            batches.lock().push(batch);
            let promise = Promise::new();
            let outcome = promise.completion();
            pending.lock().push(promise);
            outcome
        }
    }

    /// Number of batches whose outcome is still open.
    pub fn open(&self) -> usize {
        self.pending.lock().len()
    }

    /// Blocks until at least `count` outcomes are open.
    pub fn wait_for(&self, count: usize) {
        let deadline = std::time::Instant::now() + SETTLE_TIMEOUT;
        while self.open() < count {
            assert!(std::time::Instant::now() < deadline, "no batch was dispatched");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn succeed_next(&self) {
        let promise = self.pending.lock().remove(0);
        promise.fulfill(());
    }

    pub fn fail_next(&self, message: &'static str) {
        let promise = self.pending.lock().remove(0);
        promise.fail(ReactorError::batch(message));
    }
}

/// Waits for `completion`, failing the test if it does not settle in time.
pub fn settle<T: Clone + Send + Sync + 'static>(completion: &Completion<T>) -> Result<T, ReactorError> {
    completion
        .wait_timeout(SETTLE_TIMEOUT)
        .expect("completion did not settle in time")
}
