//! Settle-once promises and their observable completions.
//!
//! A [`Promise`] is the single writer of a result; a [`Completion`] is any
//! number of readers. The promise is consumed when it settles, so a result can
//! only ever be written once. Readers can register callbacks, block the
//! calling thread, or `.await` the completion on any executor.

use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll, Waker};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{ReactorError, Result};
use crate::waker::thread_waker;

type Callback<T> = Box<dyn FnOnce(&Result<T>) + Send + 'static>;

/// Shared state behind a promise and its completions.
///
/// The result lives in a `OnceLock` so settled readers never touch the mutex;
/// the mutex only guards the lists of parties still waiting.
struct Inner<T> {
    result: OnceLock<Result<T>>,
    waiting: Mutex<Waiting<T>>,
}

struct Waiting<T> {
    settled: bool,
    callbacks: Vec<Callback<T>>,
    wakers: Vec<Waker>,
}

impl<T> Inner<T> {
    fn pending() -> Self {
        Self {
            result: OnceLock::new(),
            waiting: Mutex::new(Waiting {
                settled: false,
                callbacks: Vec::new(),
                wakers: Vec::new(),
            }),
        }
    }

    fn settled(result: Result<T>) -> Self {
        Self {
            result: OnceLock::from(result),
            waiting: Mutex::new(Waiting {
                settled: true,
                callbacks: Vec::new(),
                wakers: Vec::new(),
            }),
        }
    }

    fn settle(&self, result: Result<T>) -> bool {
        if self.result.set(result).is_err() {
            return false;
        }

        let (callbacks, wakers) = {
            let mut waiting = self.waiting.lock();
            waiting.settled = true;
            (
                mem::take(&mut waiting.callbacks),
                mem::take(&mut waiting.wakers),
            )
        };

        for waker in wakers {
            waker.wake();
        }
        // Callbacks run without the lock held so they may observe or chain
        // onto this same completion.
        if let Some(result) = self.result.get() {
            for callback in callbacks {
                callback(result);
            }
        }
        true
    }

    /// Registers `waker` unless the result is already available.
    fn register_waker(&self, waker: &Waker) -> bool {
        let mut waiting = self.waiting.lock();
        if waiting.settled {
            return false;
        }
        if !waiting.wakers.iter().any(|w| w.will_wake(waker)) {
            waiting.wakers.push(waker.clone());
        }
        true
    }
}

/// The writing half of a pending result.
///
/// Settling consumes the promise. A promise dropped without being settled
/// fails its completion with [`ReactorError::Abandoned`].
pub struct Promise<T> {
    inner: Option<Arc<Inner<T>>>,
}

impl<T: Send + Sync + 'static> Promise<T> {
    /// Creates an unsettled promise.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Some(Arc::new(Inner::pending())),
        }
    }

    /// Returns a completion observing this promise.
    #[must_use]
    pub fn completion(&self) -> Completion<T> {
        let inner = match &self.inner {
            Some(inner) => Arc::clone(inner),
            None => unreachable!("promise is only emptied while settling"),
        };
        Completion { inner }
    }

    /// Settles the promise with a value.
    pub fn fulfill(self, value: T) {
        self.settle(Ok(value));
    }

    /// Settles the promise with an error.
    pub fn fail(self, error: ReactorError) {
        self.settle(Err(error));
    }

    /// Settles the promise with `result`.
    pub fn settle(mut self, result: Result<T>) {
        if let Some(inner) = self.inner.take() {
            inner.settle(result);
        }
    }
}

impl<T: Send + Sync + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.settle(Err(ReactorError::Abandoned));
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise").finish_non_exhaustive()
    }
}

/// The observable half of a promise: Pending, Fulfilled or Failed.
///
/// Cloning a completion is cheap; every clone observes the same result.
pub struct Completion<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + Sync + 'static> Completion<T> {
    /// A completion already fulfilled with `value`.
    #[must_use]
    pub fn value(value: T) -> Self {
        Self {
            inner: Arc::new(Inner::settled(Ok(value))),
        }
    }

    /// A completion already failed with `error`.
    #[must_use]
    pub fn error(error: ReactorError) -> Self {
        Self {
            inner: Arc::new(Inner::settled(Err(error))),
        }
    }

    /// Returns true once the completion holds a value or an error.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.inner.result.get().is_some()
    }

    /// Borrows the result if it is available, without blocking.
    #[must_use]
    pub fn try_result(&self) -> Option<&Result<T>> {
        self.inner.result.get()
    }

    /// Registers `callback` to run with the result.
    ///
    /// Runs immediately on the calling thread if the completion is settled,
    /// otherwise on whichever thread settles it.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(&Result<T>) + Send + 'static,
    {
        {
            let mut waiting = self.inner.waiting.lock();
            if !waiting.settled {
                waiting.callbacks.push(Box::new(callback));
                return;
            }
        }
        if let Some(result) = self.inner.result.get() {
            callback(result);
        }
    }

    /// Settles `promise` with this completion's result once it is available.
    pub fn forward_to(&self, promise: Promise<T>)
    where
        T: Clone,
    {
        self.on_complete(move |result| promise.settle(result.clone()));
    }

    /// Blocks the calling thread until the completion settles.
    pub fn wait(&self) -> Result<T>
    where
        T: Clone,
    {
        let waker = thread_waker(thread::current());
        loop {
            if let Some(result) = self.inner.result.get() {
                return result.clone();
            }
            if self.inner.register_waker(&waker) {
                thread::park();
            }
        }
    }

    /// Blocks for at most `timeout`, returning `None` if still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>>
    where
        T: Clone,
    {
        let deadline = Instant::now() + timeout;
        let waker = thread_waker(thread::current());
        loop {
            if let Some(result) = self.inner.result.get() {
                return Some(result.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            if self.inner.register_waker(&waker) {
                thread::park_timeout(deadline - now);
            }
        }
    }

    /// Combines completions into one resolving to all their values, in input
    /// order.
    ///
    /// Fails as soon as any input fails. When several fail, the error of the
    /// first one to settle wins.
    pub fn all<I>(completions: I) -> Completion<Vec<T>>
    where
        I: IntoIterator<Item = Completion<T>>,
        T: Clone,
    {
        let completions: Vec<_> = completions.into_iter().collect();
        if completions.is_empty() {
            return Completion::value(Vec::new());
        }

        let promise = Promise::new();
        let combined = promise.completion();
        let gather = Arc::new(Mutex::new(Gather {
            slots: (0..completions.len()).map(|_| None).collect(),
            remaining: completions.len(),
            promise: Some(promise),
        }));

        for (index, completion) in completions.iter().enumerate() {
            let gather = Arc::clone(&gather);
            completion.on_complete(move |result| {
                let settle = {
                    let mut gather = gather.lock();
                    match result {
                        Ok(value) => {
                            gather.slots[index] = Some(value.clone());
                            gather.remaining -= 1;
                            if gather.remaining == 0 {
                                let values = gather.slots.drain(..).flatten().collect();
                                gather.promise.take().map(|p| (p, Ok(values)))
                            } else {
                                None
                            }
                        }
                        Err(error) => gather.promise.take().map(|p| (p, Err(error.clone()))),
                    }
                };
                if let Some((promise, result)) = settle {
                    promise.settle(result);
                }
            });
        }
        combined
    }
}

struct Gather<T> {
    slots: Vec<Option<T>>,
    remaining: usize,
    promise: Option<Promise<Vec<T>>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Future for Completion<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(result) = self.inner.result.get() {
            return Poll::Ready(result.clone());
        }
        if self.inner.register_waker(cx.waker()) {
            return Poll::Pending;
        }
        // Settled between the check and the registration.
        match self.inner.result.get() {
            Some(result) => Poll::Ready(result.clone()),
            None => Poll::Pending,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.result.get() {
            None => f.write_str("Completion(Pending)"),
            Some(Ok(value)) => f.debug_tuple("Completion::Fulfilled").field(value).finish(),
            Some(Err(error)) => f.debug_tuple("Completion::Failed").field(error).finish(),
        }
    }
}
