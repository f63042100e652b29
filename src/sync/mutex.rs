//! Owner-tracking, re-entrant mutual exclusion.
//!
//! Unlike `std::sync::Mutex`, this mutex guards no data: it guards a critical
//! section. It records which thread owns it, so a release from any other
//! thread is reported as [`ErrorKind::InvalidOperation`] instead of silently
//! unlocking. The owner may acquire again; each acquire must be matched by a
//! release.
//!
//! [`ErrorKind::InvalidOperation`]: crate::ErrorKind::InvalidOperation

use super::core::{deadline_after, CoreState, WaitableCore};
use crate::error::{Error, Result};
use std::marker::PhantomData;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Ownership {
    owner: Option<ThreadId>,
    depth: usize,
}

/// Claims ownership for `me` if the mutex is free or already ours.
fn try_claim(state: &mut CoreState<Ownership>, me: ThreadId) -> Option<()> {
    match state.inner.owner {
        None => {
            state.inner.owner = Some(me);
            state.inner.depth = 1;
            state.signaled = false;
            Some(())
        }
        Some(owner) if owner == me => {
            state.inner.depth += 1;
            Some(())
        }
        Some(_) => None,
    }
}

/// A mutual-exclusion lock that remembers its owning thread.
///
/// ```
/// use threadsync::Mutex;
///
/// let mutex = Mutex::new();
/// {
///     let _guard = mutex.lock();
///     assert!(mutex.is_owned_by_current_thread());
/// }
/// assert!(!mutex.is_locked());
/// ```
#[derive(Debug)]
pub struct Mutex {
    core: WaitableCore<Ownership>,
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl Mutex {
    /// Creates an unowned mutex.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            core: WaitableCore::with_state(
                true,
                Ownership {
                    owner: None,
                    depth: 0,
                },
            ),
        }
    }

    /// Blocks until the calling thread owns the mutex.
    pub fn acquire(&self) {
        let _ = self.acquire_deadline(None);
    }

    /// Blocks up to `timeout` for ownership. Returns whether it was acquired.
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        self.acquire_deadline(deadline_after(Some(timeout)))
    }

    /// Acquires ownership only if that does not require waiting.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.core.lock();
        try_claim(&mut state, thread::current().id()).is_some()
    }

    fn acquire_deadline(&self, deadline: Option<Instant>) -> bool {
        let me = thread::current().id();
        let mut state = self.core.lock();
        self.core
            .block_until(&mut state, deadline, |s| try_claim(s, me))
            .is_some()
    }

    /// Releases one level of ownership.
    ///
    /// Fails with `InvalidOperation` if the calling thread is not the owner.
    /// The final release wakes one blocked acquirer.
    pub fn release(&self) -> Result<()> {
        let me = thread::current().id();
        let mut state = self.core.lock();
        match state.inner.owner {
            Some(owner) if owner == me => {}
            Some(_) => {
                return Err(Error::invalid_operation(
                    "mutex released by a thread that does not own it",
                ))
            }
            None => return Err(Error::invalid_operation("mutex released while unowned")),
        }

        state.inner.depth -= 1;
        if state.inner.depth == 0 {
            state.inner.owner = None;
            state.signaled = true;
            self.core.notify_one();
        }
        Ok(())
    }

    /// Acquires the mutex and returns a guard that releases it on drop.
    pub fn lock(&self) -> MutexGuard<'_> {
        self.acquire();
        MutexGuard::new(self)
    }

    /// Like [`lock`](Self::lock) but never blocks.
    pub fn try_lock(&self) -> Option<MutexGuard<'_>> {
        self.try_acquire().then(|| MutexGuard::new(self))
    }

    /// Like [`lock`](Self::lock) but gives up after `timeout`.
    pub fn try_lock_for(&self, timeout: Duration) -> Option<MutexGuard<'_>> {
        self.acquire_timeout(timeout).then(|| MutexGuard::new(self))
    }

    /// Returns whether any thread owns the mutex.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.core.lock().inner.owner.is_some()
    }

    /// Returns whether the calling thread owns the mutex.
    #[must_use]
    pub fn is_owned_by_current_thread(&self) -> bool {
        self.core.lock().inner.owner == Some(thread::current().id())
    }

    /// Returns how many unreleased acquisitions the owner holds.
    #[must_use]
    pub fn recursion_depth(&self) -> usize {
        self.core.lock().inner.depth
    }
}

/// Scoped ownership of a [`Mutex`].
///
/// Ownership is per-thread, so the guard cannot be sent to another thread.
#[must_use = "if unused the Mutex will immediately unlock"]
#[derive(Debug)]
pub struct MutexGuard<'a> {
    mutex: &'a Mutex,
    _not_send: PhantomData<*const ()>,
}

impl<'a> MutexGuard<'a> {
    const fn new(mutex: &'a Mutex) -> Self {
        Self {
            mutex,
            _not_send: PhantomData,
        }
    }

    /// Returns the mutex this guard holds.
    #[must_use]
    pub const fn mutex(&self) -> &'a Mutex {
        self.mutex
    }
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.mutex.release() {
            tracing::warn!(error = %err, "mutex guard failed to release");
        }
    }
}
