//! One-shot countdown latch.
//!
//! A latch starts at a count and is signaled when that count reaches zero.
//! The count only ever decreases; once signaled, the latch stays signaled.

use super::core::{deadline_after, WaitableCore};
use crate::error::{Error, Result};
use std::time::Duration;

#[derive(Debug)]
struct LatchState {
    initial: usize,
    remaining: usize,
}

/// A count that releases all waiters when it reaches zero.
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
/// use threadsync::CountdownLatch;
///
/// let latch = Arc::new(CountdownLatch::new(3));
/// for _ in 0..3 {
///     let latch = Arc::clone(&latch);
///     thread::spawn(move || latch.signal().unwrap());
/// }
/// latch.wait();
/// assert_eq!(latch.remaining(), 0);
/// ```
#[derive(Debug)]
pub struct CountdownLatch {
    core: WaitableCore<LatchState>,
}

impl CountdownLatch {
    /// Creates a latch. A count of zero starts signaled.
    #[must_use]
    pub const fn new(count: usize) -> Self {
        Self {
            core: WaitableCore::with_state(
                count == 0,
                LatchState {
                    initial: count,
                    remaining: count,
                },
            ),
        }
    }

    /// Decrements the count by one.
    ///
    /// Returns `true` if this call brought the count to zero.
    pub fn signal(&self) -> Result<bool> {
        self.signal_n(1)
    }

    /// Decrements the count by `n`.
    ///
    /// Fails with `InvalidArgument` for `n == 0` and with `InvalidOperation`
    /// if `n` exceeds the remaining count; in both cases nothing changes.
    pub fn signal_n(&self, n: usize) -> Result<bool> {
        if n == 0 {
            return Err(Error::invalid_argument("signal count must be positive"));
        }
        let mut state = self.core.lock();
        let remaining = state.inner.remaining;
        if n > remaining {
            return Err(Error::invalid_operation(format!(
                "latch underflow: signal({n}) with {remaining} remaining"
            )));
        }
        state.inner.remaining -= n;
        if state.inner.remaining == 0 {
            state.signaled = true;
            self.core.notify_all();
            tracing::trace!(initial = state.inner.initial, "latch released");
            return Ok(true);
        }
        Ok(false)
    }

    /// Blocks until the count reaches zero.
    pub fn wait(&self) {
        let _ = self.core.wait(None);
    }

    /// Blocks until the count reaches zero or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = deadline_after(Some(timeout));
        let mut state = self.core.lock();
        self.core
            .block_until(&mut state, deadline, |s| s.signaled.then_some(()))
            .is_some()
    }

    /// Returns the count still outstanding.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.core.lock().inner.remaining
    }

    /// Returns the count the latch was created with.
    #[must_use]
    pub fn initial_count(&self) -> usize {
        self.core.lock().inner.initial
    }

    /// Returns whether the count has reached zero.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.core.is_signaled()
    }
}
