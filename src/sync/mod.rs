//! Blocking synchronization primitives.
//!
//! Every primitive here embeds exactly one [`WaitableCore`]: a lock, a
//! condition variable and a "signaled" flag. Primitive-specific state (counts,
//! owners, phases) lives inside the core's lock, so each object is guarded by
//! a single mutex and never takes another primitive's lock.
//!
//! # Primitives
//!
//! - [`ManualResetEvent`]: stays set until reset, releasing every waiter
//! - [`AutoResetEvent`]: releases exactly one waiter per set
//! - [`CountdownLatch`]: one-shot, signaled when its count reaches zero
//! - [`Barrier`]: phased N-way rendezvous with an optional post-phase action
//! - [`Mutex`]: owner-tracking, re-entrant exclusion
//! - [`CountingSemaphore`]: bounded counter with blocking and async acquire
//! - [`ReaderWriterLock`]: shared/exclusive lock with writer preference
//!
//! # Waiting
//!
//! All blocking calls come in three flavours: an indefinite wait, a
//! `*_timeout` variant that reports expiry through its return value (never as
//! an error), and a non-blocking `try_*` variant. Timeouts are measured from
//! the moment the call begins; spurious wakeups never shorten or lengthen the
//! effective deadline.
//!
//! No primitive promises FIFO wake order.

mod barrier;
mod core;
mod event;
mod latch;
mod mutex;
mod rwlock;
mod semaphore;

pub use self::core::{CoreState, WaitOutcome, WaitableCore};
pub use barrier::{Barrier, BarrierWaitResult};
pub use event::{AutoResetEvent, ManualResetEvent};
pub use latch::CountdownLatch;
pub use mutex::{Mutex, MutexGuard};
pub use rwlock::{ReadGuard, ReaderWriterLock, WriteGuard};
pub use semaphore::{Acquire, CountingSemaphore, SemaphorePermit};

