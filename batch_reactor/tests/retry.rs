mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use batch_reactor::{
    Always, Bounded, Completion, Reactor, ReactorError, ReactorOptions, RetryPolicy, WorkItem,
};
use common::*;
use parking_lot::Mutex;

/// A batch callback failing its first `failures` batches.
fn flaky(
    failures: usize,
    calls: Arc<AtomicUsize>,
) -> impl FnMut(&mut dyn FnMut(&mut Vec<u32>)) -> Completion<()> + Send + 'static {
    move |run| {
        run(&mut Vec::new());
        if calls.fetch_add(1, Ordering::SeqCst) < failures {
            Completion::error(ReactorError::batch("Batch failed!"))
        } else {
            Completion::value(())
        }
    }
}

fn counting(runs: Arc<AtomicUsize>) -> impl FnMut(&mut Vec<u32>) -> usize + Send + 'static {
    move |batch| {
        batch.push(0);
        runs.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[test]
fn always_retries_until_the_batch_succeeds() {
    init_test_logging();
    let policy = Arc::new(Always::new());
    let options = ReactorOptions::new()
        .with_no_work_backoff(FAST_BACKOFF)
        .with_retry_policy(policy.clone());
    let reactor = Reactor::new(options, flaky(3, Arc::default()));

    let runs = Arc::new(AtomicUsize::new(0));
    let item = reactor.perform_within_batch(counting(runs.clone()));
    reactor.start().wait().unwrap();

    assert_eq!(settle(&item).unwrap(), 4);
    assert_eq!(runs.load(Ordering::SeqCst), 4);
    assert_eq!(policy.retries(), 3);
    settle(&reactor.stop()).unwrap();
}

#[test]
fn every_retry_increments_the_count_by_one() {
    /// Always retries, recording the count each item had when it failed, up
    /// to an injected bound.
    struct Observed {
        limit: u32,
        seen: Mutex<Vec<u32>>,
    }

    impl<C> RetryPolicy<C> for Observed {
        fn should_retry(&self, item: &WorkItem<C>, _error: &ReactorError) -> bool {
            self.seen.lock().push(item.retry_count());
            item.retry_count() < self.limit
        }
    }

    init_test_logging();
    let policy = Arc::new(Observed {
        limit: 4,
        seen: Mutex::new(Vec::new()),
    });
    let options = ReactorOptions::new()
        .with_no_work_backoff(FAST_BACKOFF)
        .with_retry_policy(policy.clone());
    let reactor = Reactor::new(options, failing(Batches::default(), "Batch failed!"));

    let runs = Arc::new(AtomicUsize::new(0));
    let item = reactor.perform_within_batch(counting(runs.clone()));
    reactor.start().wait().unwrap();

    assert_eq!(settle(&item).unwrap_err().to_string(), "Batch failed!");
    assert_eq!(*policy.seen.lock(), vec![0, 1, 2, 3, 4]);
    assert_eq!(runs.load(Ordering::SeqCst), 5);
    settle(&reactor.stop()).unwrap();
}

#[test]
fn bounded_gives_up_with_the_batch_error() {
    init_test_logging();
    let policy = Arc::new(Bounded::new(2));
    let options = ReactorOptions::new()
        .with_no_work_backoff(FAST_BACKOFF)
        .with_retry_policy(policy.clone());
    let batches = Batches::default();
    let reactor = Reactor::new(options, failing(batches.clone(), "Batch failed!"));

    let pending: Vec<_> = (0..3)
        .map(|i| {
            reactor.perform_within_batch(move |batch: &mut Vec<u32>| {
                batch.push(i);
                i
            })
        })
        .collect();
    reactor.start().wait().unwrap();

    for completion in &pending {
        assert_eq!(settle(completion).unwrap_err().to_string(), "Batch failed!");
    }
    assert_eq!(policy.retries(), 6);
    assert_eq!(*batches.lock(), vec![vec![0, 1, 2]; 3]);
    settle(&reactor.stop()).unwrap();
}

#[test]
fn stop_drains_items_still_being_retried() {
    init_test_logging();
    let policy = Arc::new(Bounded::new(3));
    let options = ReactorOptions::new()
        .with_no_work_backoff(FAST_BACKOFF)
        .with_retry_policy(policy.clone());
    let outcomes = Outcomes::default();
    let reactor = Reactor::new(options, outcomes.callback(Batches::default()));
    reactor.start().wait().unwrap();

    let runs = Arc::new(AtomicUsize::new(0));
    let item = reactor.perform_within_batch(counting(runs.clone()));
    outcomes.wait_for(1);
    let stopped = reactor.stop();

    // The first outcome fails after stop began; the retry must still run.
    outcomes.fail_next("Batch failed!");
    outcomes.wait_for(1);
    assert!(!stopped.is_settled());
    outcomes.succeed_next();

    assert_eq!(settle(&item).unwrap(), 2);
    settle(&stopped).unwrap();
    assert_eq!(policy.retries(), 1);
}

#[test]
fn without_a_policy_nothing_is_retried() {
    init_test_logging();
    let calls = Arc::new(AtomicUsize::new(0));
    let options = ReactorOptions::new().with_no_work_backoff(FAST_BACKOFF);
    let reactor = Reactor::new(options, flaky(1, calls.clone()));
    reactor.start().wait().unwrap();

    let item = reactor.perform_within_batch(counting(Arc::default()));
    assert_eq!(settle(&item).unwrap_err().to_string(), "Batch failed!");
    settle(&reactor.stop()).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn retry_that_skips_the_context_does_not_reuse_the_failed_result() {
    init_test_logging();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let options = ReactorOptions::new()
        .with_no_work_backoff(FAST_BACKOFF)
        .with_retry_policy(Arc::new(Always::new()));
    let reactor = Reactor::new(options, move |run: &mut dyn FnMut(&mut Vec<u32>)| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            run(&mut Vec::new());
            Completion::error(ReactorError::batch("Batch failed!"))
        } else {
            Completion::value(())
        }
    });

    let item = reactor.perform_within_batch(|_: &mut Vec<u32>| 42);
    reactor.start().wait().unwrap();

    assert!(matches!(settle(&item), Err(ReactorError::BatchNotYielded)));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    settle(&reactor.stop()).unwrap();
}
