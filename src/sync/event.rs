//! Manual- and auto-reset events.
//!
//! A [`ManualResetEvent`] behaves like a gate: once set, every current and
//! future waiter passes until it is reset. An [`AutoResetEvent`] behaves like
//! a turnstile: each set lets exactly one waiter through and then closes
//! again.
//!
//! # Coalescing
//!
//! The auto-reset event's flag is a boolean. Calling `set` twice while no
//! thread is waiting leaves a single pending release, not two:
//!
//! ```
//! use std::time::Duration;
//! use threadsync::AutoResetEvent;
//!
//! let event = AutoResetEvent::new(false);
//! event.set();
//! event.set();
//! assert!(event.wait_timeout(Duration::ZERO));
//! assert!(!event.wait_timeout(Duration::from_millis(10)));
//! ```
//!
//! When threads are already blocked, each `set` grants one of them a release
//! directly, so two sets release two blocked waiters.

use super::core::{deadline_after, CoreState, WaitableCore};
use std::time::Duration;

/// An event that stays set until explicitly reset.
///
/// Setting the event releases every thread blocked in [`wait`](Self::wait);
/// waiters arriving while it is set return immediately.
#[derive(Debug, Default)]
pub struct ManualResetEvent {
    core: WaitableCore,
}

impl ManualResetEvent {
    /// Creates a new event.
    #[must_use]
    pub const fn new(initially_set: bool) -> Self {
        Self {
            core: WaitableCore::new(initially_set),
        }
    }

    /// Sets the event, releasing all waiters.
    pub fn set(&self) {
        self.core.signal_all();
    }

    /// Clears the event. Threads already released are unaffected.
    pub fn reset(&self) {
        self.core.reset();
    }

    /// Returns whether the event is set.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.core.is_signaled()
    }

    /// Blocks until the event is set.
    pub fn wait(&self) {
        let _ = self.core.wait(None);
    }

    /// Blocks until the event is set or `timeout` elapses.
    ///
    /// Returns `true` if the event was observed set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.core.wait(Some(timeout)).is_signaled()
    }

    /// Returns whether the event is set, without blocking.
    #[must_use]
    pub fn try_wait(&self) -> bool {
        self.is_set()
    }
}

/// Releases handed to blocked waiters but not yet claimed by them.
#[derive(Debug, Default)]
struct AutoState {
    releases: usize,
}

/// An event that releases exactly one waiter per set, then resets itself.
#[derive(Debug)]
pub struct AutoResetEvent {
    core: WaitableCore<AutoState>,
}

impl Default for AutoResetEvent {
    fn default() -> Self {
        Self::new(false)
    }
}

impl AutoResetEvent {
    /// Creates a new event.
    #[must_use]
    pub const fn new(initially_set: bool) -> Self {
        Self {
            core: WaitableCore::with_state(initially_set, AutoState { releases: 0 }),
        }
    }

    /// Releases one waiter.
    ///
    /// If a thread is blocked without a pending release, it is handed one and
    /// woken; otherwise the event becomes set so the next waiter passes.
    pub fn set(&self) {
        let mut state = self.core.lock();
        if state.waiters > state.inner.releases {
            state.inner.releases += 1;
            self.core.notify_one();
        } else {
            state.signaled = true;
        }
    }

    /// Clears a pending set. Releases already handed to blocked waiters stand.
    pub fn reset(&self) {
        self.core.reset();
    }

    /// Returns whether a set is pending.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.core.is_signaled()
    }

    /// Blocks until released, consuming the release.
    pub fn wait(&self) {
        let _ = self.wait_deadline(None);
    }

    /// Blocks until released or `timeout` elapses.
    ///
    /// Returns `true` if this call consumed a release.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.wait_deadline(Some(timeout))
    }

    /// Consumes a pending set without blocking.
    pub fn try_wait(&self) -> bool {
        let mut state = self.core.lock();
        take_release(&mut state)
    }

    fn wait_deadline(&self, timeout: Option<Duration>) -> bool {
        let deadline = deadline_after(timeout);
        let mut state = self.core.lock();
        self.core
            .block_until(&mut state, deadline, |s| take_release(s).then_some(()))
            .is_some()
    }
}

fn take_release(state: &mut CoreState<AutoState>) -> bool {
    if state.inner.releases > 0 {
        state.inner.releases -= 1;
        true
    } else if state.signaled {
        state.signaled = false;
        true
    } else {
        false
    }
}
