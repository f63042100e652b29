//! The waitable core shared by every primitive.
//!
//! A [`WaitableCore`] pairs a `parking_lot` mutex with a condition variable.
//! The mutex guards a [`CoreState`]: the generic "signaled" flag, the number
//! of threads currently parked, and the owning primitive's own state `S`.
//!
//! Primitives build their blocking operations on
//! [`WaitableCore::block_until`], which takes a *readiness* closure. The
//! closure runs under the lock, and either claims whatever the caller is
//! waiting for (returning `Some`) or reports that the caller must keep
//! waiting (returning `None`). Because readiness is re-evaluated after every
//! wake, spurious wakeups are harmless, and because the deadline is fixed at
//! call entry, repeated wakes never extend a timed wait.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fmt;
use std::time::{Duration, Instant};

/// Result of a timed wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitOutcome {
    /// The condition was observed before the deadline.
    Signaled,
    /// The deadline passed first. Nothing was consumed.
    TimedOut,
}

impl WaitOutcome {
    /// Returns true for [`WaitOutcome::Signaled`].
    #[must_use]
    pub const fn is_signaled(self) -> bool {
        matches!(self, Self::Signaled)
    }

    /// Returns true for [`WaitOutcome::TimedOut`].
    #[must_use]
    pub const fn is_timed_out(self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

/// State guarded by a [`WaitableCore`]'s lock.
#[derive(Debug, Default)]
pub struct CoreState<S> {
    pub(crate) signaled: bool,
    pub(crate) waiters: usize,
    pub(crate) inner: S,
}

impl<S> CoreState<S> {
    /// Whether the core's flag is set.
    #[must_use]
    pub const fn signaled(&self) -> bool {
        self.signaled
    }

    /// Number of threads currently parked on this core.
    #[must_use]
    pub const fn waiters(&self) -> usize {
        self.waiters
    }
}

/// Converts a relative timeout into an absolute deadline.
///
/// `None` means "wait forever". A timeout too large to represent as an
/// `Instant` is also treated as infinite.
pub(crate) fn deadline_after(timeout: Option<Duration>) -> Option<Instant> {
    timeout.and_then(|d| Instant::now().checked_add(d))
}

/// A lock, a condition variable and a signaled flag.
///
/// `S` is the primitive-specific state protected by the same lock. The
/// plain core (`S = ()`) is itself a usable notification object:
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
/// use std::time::Duration;
/// use threadsync::{WaitOutcome, WaitableCore};
///
/// let core = Arc::new(WaitableCore::new(false));
/// let signaller = Arc::clone(&core);
/// let handle = thread::spawn(move || signaller.signal_all());
/// assert_eq!(core.wait(Some(Duration::from_secs(5))), WaitOutcome::Signaled);
/// handle.join().unwrap();
/// ```
pub struct WaitableCore<S = ()> {
    state: Mutex<CoreState<S>>,
    cvar: Condvar,
}

impl WaitableCore<()> {
    /// Creates a core with the given initial flag.
    #[must_use]
    pub const fn new(signaled: bool) -> Self {
        Self::with_state(signaled, ())
    }
}

impl Default for WaitableCore<()> {
    fn default() -> Self {
        Self::new(false)
    }
}

impl<S> WaitableCore<S> {
    /// Creates a core carrying primitive-specific state.
    #[must_use]
    pub const fn with_state(signaled: bool, inner: S) -> Self {
        Self {
            state: Mutex::new(CoreState {
                signaled,
                waiters: 0,
                inner,
            }),
            cvar: Condvar::new(),
        }
    }

    /// Blocks until the flag is set or the timeout elapses.
    ///
    /// The wait does not consume the flag. `None` waits forever.
    pub fn wait(&self, timeout: Option<Duration>) -> WaitOutcome {
        let deadline = deadline_after(timeout);
        let mut state = self.state.lock();
        match self.block_until(&mut state, deadline, |s| s.signaled.then_some(())) {
            Some(()) => WaitOutcome::Signaled,
            None => WaitOutcome::TimedOut,
        }
    }

    /// Sets the flag and wakes at most one waiter.
    pub fn signal_one(&self) {
        let mut state = self.state.lock();
        state.signaled = true;
        self.cvar.notify_one();
    }

    /// Sets the flag and wakes every waiter.
    pub fn signal_all(&self) {
        let mut state = self.state.lock();
        state.signaled = true;
        self.cvar.notify_all();
    }

    /// Clears the flag.
    pub fn reset(&self) {
        self.state.lock().signaled = false;
    }

    /// Returns whether the flag is currently set.
    #[must_use]
    pub fn is_signaled(&self) -> bool {
        self.state.lock().signaled
    }

    /// Returns the number of threads parked on this core right now.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.state.lock().waiters
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, CoreState<S>> {
        self.state.lock()
    }

    pub(crate) fn notify_one(&self) -> bool {
        self.cvar.notify_one()
    }

    pub(crate) fn notify_all(&self) -> usize {
        self.cvar.notify_all()
    }

    /// Parks on this core's condition variable until `ready` yields a value.
    ///
    /// Returns `None` if the deadline passed first.
    pub(crate) fn block_until<R>(
        &self,
        guard: &mut MutexGuard<'_, CoreState<S>>,
        deadline: Option<Instant>,
        ready: impl FnMut(&mut CoreState<S>) -> Option<R>,
    ) -> Option<R> {
        Self::block_on(&self.cvar, guard, deadline, ready)
    }

    /// Like [`block_until`](Self::block_until) but parks on `cvar`, which
    /// must only ever be used together with this core's lock.
    ///
    /// `ready` is evaluated once more after the deadline passes, so a grant
    /// that raced with the timeout is claimed instead of lost.
    pub(crate) fn block_on<R>(
        cvar: &Condvar,
        guard: &mut MutexGuard<'_, CoreState<S>>,
        deadline: Option<Instant>,
        mut ready: impl FnMut(&mut CoreState<S>) -> Option<R>,
    ) -> Option<R> {
        if let Some(value) = ready(&mut **guard) {
            return Some(value);
        }

        guard.waiters += 1;
        let result = loop {
            match deadline {
                None => cvar.wait(guard),
                Some(deadline) => {
                    if cvar.wait_until(guard, deadline).timed_out() {
                        break ready(&mut **guard);
                    }
                }
            }
            if let Some(value) = ready(&mut **guard) {
                break Some(value);
            }
        };
        guard.waiters -= 1;
        result
    }
}

impl<S> fmt::Debug for WaitableCore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("WaitableCore");
        match self.state.try_lock() {
            Some(state) => d
                .field("signaled", &state.signaled)
                .field("waiters", &state.waiters),
            None => d.field("state", &"<locked>"),
        };
        d.finish()
    }
}
