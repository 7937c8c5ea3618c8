//! Waker that unparks a blocked thread.
//!
//! Blocking waits on a [`Completion`](crate::Completion) park the calling
//! thread and register one of these wakers; settling the completion wakes it.

use std::sync::Arc;
use std::task::{RawWaker, RawWakerVTable, Waker};
use std::thread::Thread;

/// Creates a waker that unparks `thread` when woken.
///
/// Clones share one reference-counted `Thread` handle instead of boxing a
/// fresh copy per clone.
pub(crate) fn thread_waker(thread: Thread) -> Waker {
    let ptr = Arc::into_raw(Arc::new(thread)) as *const ();
    unsafe { Waker::from_raw(RawWaker::new(ptr, &THREAD_VTABLE)) }
}

unsafe fn clone_thread(ptr: *const ()) -> RawWaker {
    // Bump the count without taking ownership of the caller's reference.
    unsafe { Arc::increment_strong_count(ptr as *const Thread) };
    RawWaker::new(ptr, &THREAD_VTABLE)
}

unsafe fn wake_thread(ptr: *const ()) {
    // Consumes the reference held by this waker.
    let thread = unsafe { Arc::from_raw(ptr as *const Thread) };
    thread.unpark();
}

unsafe fn wake_thread_by_ref(ptr: *const ()) {
    let thread = unsafe { &*(ptr as *const Thread) };
    thread.unpark();
}

unsafe fn drop_thread(ptr: *const ()) {
    drop(unsafe { Arc::from_raw(ptr as *const Thread) });
}

static THREAD_VTABLE: RawWakerVTable =
    RawWakerVTable::new(clone_thread, wake_thread, wake_thread_by_ref, drop_thread);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wake_unparks_the_registered_thread() {
        let ready = Arc::new(AtomicBool::new(false));
        let flag = ready.clone();

        let parked = thread::spawn(move || {
            while !flag.load(Ordering::Acquire) {
                thread::park();
            }
        });

        let waker = thread_waker(parked.thread().clone());
        let cloned = waker.clone();
        drop(waker);

        thread::sleep(Duration::from_millis(10));
        ready.store(true, Ordering::Release);
        cloned.wake();

        parked.join().unwrap();
    }

    #[test]
    fn wakers_for_the_same_handle_compare_equal() {
        let waker = thread_waker(thread::current());
        let cloned = waker.clone();
        assert!(waker.will_wake(&cloned));
    }
}
