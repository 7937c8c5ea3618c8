//! A batch reactor: coalesces work submitted by many producer threads into
//! bounded batches processed sequentially on one dedicated worker thread.
//!
//! Producers admit closures with [`Reactor::perform_within_batch`] and get a
//! [`Completion`] back. The worker hands each batch to a caller-supplied
//! callback, which yields a batch context (a connection, a write buffer) that
//! every item in the batch runs against, then reports the batch outcome.
//! Item completions settle from that outcome.
//!
//! The crate consists of:
//!
//! - [`reactor`]: the reactor, its options and the double-buffered drain loop
//! - [`retry`]: opt-in retry policies for failed batches
//! - [`cluster`]: a set of reactors addressed through a key partitioner
//! - [`future`]: the promise/completion pair every result is delivered through
//! - [`config`]: serde-friendly configuration
//! - [`observability`]: metric names and the optional Prometheus exporter
//!
//! ```no_run
//! use batch_reactor::{Completion, Reactor, ReactorOptions};
//!
//! let reactor = Reactor::new(ReactorOptions::<Vec<String>>::new(), |run| {
//!     let mut rows: Vec<String> = Vec::new();
//!     run(&mut rows);
//!     // flush `rows` downstream here
//!     Completion::value(())
//! });
//! reactor.start().wait().unwrap();
//!
//! let written = reactor.perform_within_batch(|rows| {
//!     rows.push("hello".to_string());
//!     rows.len()
//! });
//! assert_eq!(written.wait().unwrap(), 1);
//! reactor.stop().wait().unwrap();
//! ```

pub mod cluster;
pub mod config;
pub mod error;
pub mod future;
pub mod observability;
pub mod reactor;
pub mod retry;
mod waker;

pub use cluster::{ReactorCluster, hash_partitioner};
pub use config::{ReactorConfig, RetryPolicyConfig};
pub use error::{ReactorError, Result, SharedError};
pub use future::{Completion, Promise};
pub use reactor::{
    BatchCallback, Buffers, OverflowPolicy, Reactor, ReactorOptions, ReactorState, RetryBuffer,
    WorkItem,
};
pub use retry::{Always, Bounded, RetryPolicy};
