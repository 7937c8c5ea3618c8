//! Admitted units of work.
//!
//! Each admission is type-erased into a [`WorkItem`] so a single reactor can
//! carry actions with different result types. The item owns the action, the
//! promise for its result and the value captured during the last run.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use crate::error::ReactorError;
use crate::future::{Completion, Promise};

/// Value captured from the most recent run of an action.
enum Captured<T> {
    Immediate(T),
    /// A nested async result; the closure chains the item's promise onto it.
    Deferred(Box<dyn FnOnce(Promise<T>) + Send>),
    Panicked(String),
}

/// Object-safe view of an item, independent of its result type.
trait Job<C>: Send {
    fn run(&mut self, context: &mut C);
    fn complete(self: Box<Self>);
    fn fail(self: Box<Self>, error: ReactorError);
    /// Forgets the result of the last run.
    fn reset(&mut self);
}

struct Work<T, F> {
    action: F,
    promise: Promise<T>,
    captured: Option<Captured<T>>,
}

impl<C, T, F> Job<C> for Work<T, F>
where
    T: Send + Sync + 'static,
    F: FnMut(&mut C) -> Captured<T> + Send,
{
    fn run(&mut self, context: &mut C) {
        let action = &mut self.action;
        let captured = match panic::catch_unwind(AssertUnwindSafe(|| action(context))) {
            Ok(captured) => captured,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(panic = %message, "batch action panicked");
                Captured::Panicked(message)
            }
        };
        self.captured = Some(captured);
    }

    fn complete(self: Box<Self>) {
        let Work {
            promise, captured, ..
        } = *self;
        match captured {
            Some(Captured::Immediate(value)) => promise.fulfill(value),
            Some(Captured::Deferred(forward)) => forward(promise),
            Some(Captured::Panicked(message)) => promise.fail(ReactorError::ActionPanicked(message)),
            None => promise.fail(ReactorError::BatchNotYielded),
        }
    }

    fn fail(self: Box<Self>, error: ReactorError) {
        let work = *self;
        work.promise.fail(error);
    }

    fn reset(&mut self) {
        self.captured = None;
    }
}

/// One admitted unit of work and the promise for its result.
///
/// An item lives in exactly one buffer at a time and is consumed when its
/// promise settles.
pub struct WorkItem<C> {
    job: Box<dyn Job<C>>,
    retry_count: u32,
}

impl<C: 'static> WorkItem<C> {
    /// Wraps an action that returns its result directly.
    pub(crate) fn immediate<T, F>(mut action: F) -> (Self, Completion<T>)
    where
        T: Send + Sync + 'static,
        F: FnMut(&mut C) -> T + Send + 'static,
    {
        Self::with_action(move |context: &mut C| Captured::Immediate(action(context)))
    }

    /// Wraps an action that returns a nested completion; the item's result is
    /// whatever that completion settles to.
    pub(crate) fn deferred<T, F>(mut action: F) -> (Self, Completion<T>)
    where
        T: Clone + Send + Sync + 'static,
        F: FnMut(&mut C) -> Completion<T> + Send + 'static,
    {
        Self::with_action(move |context: &mut C| {
            let nested = action(context);
            Captured::Deferred(Box::new(move |promise| nested.forward_to(promise)))
        })
    }

    fn with_action<T, F>(action: F) -> (Self, Completion<T>)
    where
        T: Send + Sync + 'static,
        F: FnMut(&mut C) -> Captured<T> + Send + 'static,
    {
        let promise = Promise::new();
        let completion = promise.completion();
        let work = Work {
            action,
            promise,
            captured: None,
        };
        let item = Self {
            job: Box::new(work),
            retry_count: 0,
        };
        (item, completion)
    }
}

impl<C> WorkItem<C> {
    /// Number of times this item has been handed back for retry.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Fails the item's promise with `error`.
    pub fn fail(self, error: ReactorError) {
        self.job.fail(error);
    }

    /// Runs the action against the batch context, capturing its result.
    ///
    /// A panic inside the action is captured as that item's failure and does
    /// not reach the caller.
    pub(crate) fn run(&mut self, context: &mut C) {
        self.job.run(context);
    }

    /// Settles the promise from the captured result of the last run.
    pub(crate) fn complete(self) {
        self.job.complete();
    }

    /// Bumps the retry count and drops the result of the failed attempt, so
    /// the item only settles from a run in the batch that succeeds.
    pub(crate) fn mark_retried(&mut self) {
        self.retry_count += 1;
        self.job.reset();
    }
}

impl<C> fmt::Debug for WorkItem<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("retry_count", &self.retry_count)
            .finish_non_exhaustive()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
