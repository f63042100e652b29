//! Threadsync: blocking synchronization primitives and a fixed-size worker pool.
//!
//! # Overview
//!
//! Every primitive in this crate is built on one shared building block, the
//! [`WaitableCore`](sync::WaitableCore): a mutex, a condition variable and a
//! "signaled" flag. Waiters always re-check their predicate after waking, so
//! spurious wakeups are harmless, and timeouts are measured from the moment a
//! wait begins.
//!
//! On top of the core sit the classic objects:
//!
//! - **Events**: [`ManualResetEvent`] (stays set) and [`AutoResetEvent`]
//!   (releases exactly one waiter per set)
//! - **Counting**: [`CountdownLatch`] and [`CountingSemaphore`]
//! - **Coordination**: [`Barrier`] with an optional post-phase action
//! - **Exclusion**: an owner-tracking [`Mutex`] and a writer-preferring
//!   [`ReaderWriterLock`]
//!
//! The [`WorkerPool`] consumes those primitives to run submitted closures on
//! a fixed set of OS threads, with a bounded FIFO queue, per-task handles and
//! a graceful `Running → Draining → Stopped` shutdown.
//!
//! # Module Structure
//!
//! - [`sync`]: the waitable core and every blocking primitive
//! - [`runtime`]: worker pool, task handles, worker context and configuration
//! - [`cancel`]: cooperative cancellation tokens
//! - [`error`]: error types
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use threadsync::{CountdownLatch, WorkerPool};
//!
//! let pool = WorkerPool::new(2).expect("pool");
//! let latch = Arc::new(CountdownLatch::new(4));
//! for _ in 0..4 {
//!     let latch = Arc::clone(&latch);
//!     pool.submit(move || {
//!         latch.signal().expect("latch underflow");
//!     })
//!     .expect("submit");
//! }
//! latch.wait();
//! pool.shutdown(true);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod cancel;
pub mod error;
pub mod runtime;
pub mod sync;

#[cfg(test)]
pub mod test_utils;

pub use cancel::{CancellationToken, Cancelled};
pub use error::{Error, ErrorKind, Result};
pub use runtime::{
    PoolConfig, PoolState, PoolStats, TaskError, TaskHandle, TaskId, WorkerContext, WorkerPool,
    WorkerPoolBuilder,
};
pub use sync::{
    AutoResetEvent, Barrier, BarrierWaitResult, CountdownLatch, CountingSemaphore,
    ManualResetEvent, Mutex, MutexGuard, ReaderWriterLock, WaitOutcome, WaitableCore,
};
