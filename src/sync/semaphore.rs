//! Bounded counting semaphore with blocking and async acquisition.
//!
//! The count lives in `0..=max`. Acquiring takes one unit, blocking (or
//! pending) while the count is zero; releasing returns units and fails rather
//! than exceed `max`.
//!
//! Blocking acquirers park on the semaphore's condition variable. Async
//! acquirers register a waker in a queue guarded by the same lock. A release
//! of `n` units wakes up to `n` of each kind; whoever re-checks the count
//! first wins and the others wait again.

use super::core::{deadline_after, CoreState, WaitableCore};
use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct AsyncWaiter {
    id: u64,
    waker: Waker,
}

#[derive(Debug)]
struct SemState {
    count: usize,
    max: usize,
    async_waiters: VecDeque<AsyncWaiter>,
    next_waiter_id: u64,
}

fn try_take(state: &mut CoreState<SemState>) -> Option<()> {
    if state.inner.count == 0 {
        return None;
    }
    state.inner.count -= 1;
    state.signaled = state.inner.count > 0;
    Some(())
}

/// A counting semaphore with an upper bound.
///
/// ```
/// use threadsync::CountingSemaphore;
///
/// let sem = CountingSemaphore::new(1, 2).unwrap();
/// assert!(sem.try_acquire());
/// assert!(!sem.try_acquire());
/// assert_eq!(sem.release().unwrap(), 0);
/// ```
#[derive(Debug)]
pub struct CountingSemaphore {
    core: WaitableCore<SemState>,
}

impl CountingSemaphore {
    /// Creates a semaphore with `initial` available units and capacity `max`.
    ///
    /// Fails with `InvalidArgument` unless `1 <= max` and `initial <= max`.
    pub fn new(initial: usize, max: usize) -> Result<Self> {
        if max == 0 {
            return Err(Error::invalid_argument("semaphore max count must be positive"));
        }
        if initial > max {
            return Err(Error::invalid_argument(format!(
                "initial count {initial} exceeds max count {max}"
            )));
        }
        Ok(Self {
            core: WaitableCore::with_state(
                initial > 0,
                SemState {
                    count: initial,
                    max,
                    async_waiters: VecDeque::new(),
                    next_waiter_id: 0,
                },
            ),
        })
    }

    /// Returns the number of currently available units.
    #[must_use]
    pub fn available(&self) -> usize {
        self.core.lock().inner.count
    }

    /// Returns the capacity.
    #[must_use]
    pub fn max_count(&self) -> usize {
        self.core.lock().inner.max
    }

    /// Blocks until a unit is available and takes it.
    pub fn acquire(&self) {
        let _ = self.acquire_deadline(None);
    }

    /// Blocks up to `timeout` for a unit. Returns whether one was taken.
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        self.acquire_deadline(deadline_after(Some(timeout)))
    }

    /// Takes a unit only if one is available now.
    pub fn try_acquire(&self) -> bool {
        try_take(&mut self.core.lock()).is_some()
    }

    fn acquire_deadline(&self, deadline: Option<Instant>) -> bool {
        let mut state = self.core.lock();
        self.core.block_until(&mut state, deadline, try_take).is_some()
    }

    /// Returns one unit. See [`release_n`](Self::release_n).
    pub fn release(&self) -> Result<usize> {
        self.release_n(1)
    }

    /// Returns `n` units and reports the count before the release.
    ///
    /// Fails with `InvalidArgument` for `n == 0` and with `InvalidOperation`
    /// if the count would exceed the maximum; in both cases nothing changes.
    pub fn release_n(&self, n: usize) -> Result<usize> {
        if n == 0 {
            return Err(Error::invalid_argument("release count must be positive"));
        }
        let mut state = self.core.lock();
        let previous = state.inner.count;
        let max = state.inner.max;
        if n > max - previous {
            return Err(Error::invalid_operation(format!(
                "semaphore overflow: release({n}) with count {previous} of max {max}"
            )));
        }
        state.inner.count += n;
        state.signaled = true;

        for _ in 0..n.min(state.waiters) {
            self.core.notify_one();
        }
        let take = n.min(state.inner.async_waiters.len());
        let wakers: Vec<Waker> = state
            .inner
            .async_waiters
            .drain(..take)
            .map(|w| w.waker)
            .collect();
        drop(state);

        for waker in wakers {
            waker.wake();
        }
        Ok(previous)
    }

    /// Returns a future that resolves once a unit has been taken.
    pub const fn acquire_async(&self) -> Acquire<'_> {
        Acquire {
            semaphore: self,
            waiter_id: None,
            done: false,
        }
    }

    /// Blocks for a unit and returns a permit that gives it back on drop.
    pub fn acquire_permit(&self) -> SemaphorePermit<'_> {
        self.acquire();
        SemaphorePermit { semaphore: self }
    }

    /// Takes a permit if one is available now.
    pub fn try_acquire_permit(&self) -> Option<SemaphorePermit<'_>> {
        self.try_acquire().then_some(SemaphorePermit { semaphore: self })
    }

    /// Waits up to `timeout` for a permit.
    pub fn try_acquire_permit_for(&self, timeout: Duration) -> Option<SemaphorePermit<'_>> {
        self.acquire_timeout(timeout)
            .then_some(SemaphorePermit { semaphore: self })
    }
}

/// Future returned by [`CountingSemaphore::acquire_async`].
///
/// Dropping it before completion removes its registration. If it had already
/// been woken by a release, the wake-up is handed on so the unit is not
/// stranded.
#[must_use = "futures do nothing unless polled"]
#[derive(Debug)]
pub struct Acquire<'a> {
    semaphore: &'a CountingSemaphore,
    waiter_id: Option<u64>,
    done: bool,
}

impl Future for Acquire<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(());
        }

        let mut state = this.semaphore.core.lock();
        let queued = this
            .waiter_id
            .and_then(|id| state.inner.async_waiters.iter().position(|w| w.id == id));

        if try_take(&mut state).is_some() {
            if let Some(index) = queued {
                state.inner.async_waiters.remove(index);
            }
            this.waiter_id = None;
            this.done = true;
            return Poll::Ready(());
        }

        match queued {
            Some(index) => {
                let waiter = &mut state.inner.async_waiters[index];
                if !waiter.waker.will_wake(cx.waker()) {
                    waiter.waker = cx.waker().clone();
                }
            }
            None => {
                // First poll, or woken by a release that someone else won.
                let id = *this.waiter_id.get_or_insert_with(|| {
                    let id = state.inner.next_waiter_id;
                    state.inner.next_waiter_id = id.wrapping_add(1);
                    id
                });
                state.inner.async_waiters.push_back(AsyncWaiter {
                    id,
                    waker: cx.waker().clone(),
                });
            }
        }
        Poll::Pending
    }
}

impl Drop for Acquire<'_> {
    fn drop(&mut self) {
        let Some(id) = self.waiter_id.take() else {
            return;
        };
        let mut state = self.semaphore.core.lock();
        if let Some(index) = state.inner.async_waiters.iter().position(|w| w.id == id) {
            state.inner.async_waiters.remove(index);
            return;
        }
        // Woken but never claimed: pass the wake-up on.
        if state.inner.count > 0 {
            let next = state.inner.async_waiters.pop_front();
            self.semaphore.core.notify_one();
            drop(state);
            if let Some(waiter) = next {
                waiter.waker.wake();
            }
        }
    }
}

/// One unit of a [`CountingSemaphore`], returned on drop.
#[must_use = "dropping the permit releases it immediately"]
#[derive(Debug)]
pub struct SemaphorePermit<'a> {
    semaphore: &'a CountingSemaphore,
}

impl SemaphorePermit<'_> {
    /// Keeps the unit taken without releasing it.
    pub fn forget(self) {
        std::mem::forget(self);
    }
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.semaphore.release() {
            tracing::warn!(error = %err, "semaphore permit release failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_utils::{init_test_logging, settle};
    use futures_lite::future;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn constructor_validates_counts() {
        init_test("constructor_validates_counts");
        crate::assert_err_kind!(CountingSemaphore::new(0, 0), ErrorKind::InvalidArgument);
        crate::assert_err_kind!(CountingSemaphore::new(4, 3), ErrorKind::InvalidArgument);
        let sem = CountingSemaphore::new(3, 3).expect("valid");
        crate::assert_with_log!(sem.available() == 3, "initial", 3usize, sem.available());
        crate::test_complete!("constructor_validates_counts");
    }

    #[test]
    fn release_overflow_is_rejected_without_change() {
        init_test("release_overflow_is_rejected_without_change");
        let sem = CountingSemaphore::new(2, 3).expect("valid");
        crate::assert_err_kind!(sem.release_n(3), ErrorKind::InvalidOperation);
        crate::assert_err_kind!(sem.release_n(0), ErrorKind::InvalidArgument);
        crate::assert_with_log!(sem.available() == 2, "unchanged", 2usize, sem.available());

        let previous = sem.release().expect("room for one");
        crate::assert_with_log!(previous == 2, "previous count", 2usize, previous);
        crate::assert_err_kind!(sem.release(), ErrorKind::InvalidOperation);
        crate::test_complete!("release_overflow_is_rejected_without_change");
    }

    #[test]
    fn concurrent_holders_never_exceed_capacity() {
        init_test("concurrent_holders_never_exceed_capacity");
        let sem = Arc::new(CountingSemaphore::new(2, 2).expect("valid"));
        let holding = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let sem = Arc::clone(&sem);
                let holding = Arc::clone(&holding);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    for _ in 0..20 {
                        let _permit = sem.acquire_permit();
                        let now = holding.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        thread::yield_now();
                        holding.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker panicked");
        }

        let peak = peak.load(Ordering::SeqCst);
        crate::assert_with_log!(peak <= 2, "capacity bound", "<= 2", peak);
        crate::assert_with_log!(sem.available() == 2, "all returned", 2usize, sem.available());
        crate::test_complete!("concurrent_holders_never_exceed_capacity");
    }

    #[test]
    fn timed_acquire_expires_when_empty() {
        init_test("timed_acquire_expires_when_empty");
        let sem = CountingSemaphore::new(0, 1).expect("valid");
        let acquired = sem.acquire_timeout(Duration::from_millis(15));
        crate::assert_with_log!(!acquired, "expired", false, acquired);
        crate::test_complete!("timed_acquire_expires_when_empty");
    }

    #[test]
    fn release_wakes_blocked_acquirer() {
        init_test("release_wakes_blocked_acquirer");
        let sem = Arc::new(CountingSemaphore::new(0, 1).expect("valid"));
        let waiter = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || sem.acquire_timeout(Duration::from_secs(5)))
        };
        settle();
        sem.release().expect("release");
        let acquired = waiter.join().expect("waiter panicked");
        crate::assert_with_log!(acquired, "woken", true, acquired);
        crate::assert_with_log!(sem.available() == 0, "unit consumed", 0usize, sem.available());
        crate::test_complete!("release_wakes_blocked_acquirer");
    }

    #[test]
    fn async_acquire_resolves_after_release() {
        init_test("async_acquire_resolves_after_release");
        let sem = Arc::new(CountingSemaphore::new(0, 1).expect("valid"));

        let releaser = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || {
                settle();
                sem.release().expect("release");
            })
        };
        future::block_on(sem.acquire_async());
        releaser.join().expect("releaser panicked");
        crate::assert_with_log!(sem.available() == 0, "unit taken", 0usize, sem.available());
        crate::test_complete!("async_acquire_resolves_after_release");
    }

    #[test]
    fn dropped_pending_future_deregisters() {
        init_test("dropped_pending_future_deregisters");
        let sem = CountingSemaphore::new(0, 1).expect("valid");
        let mut fut = sem.acquire_async();
        let first = future::block_on(future::poll_once(&mut fut));
        crate::assert_with_log!(first.is_none(), "pending", "None", first);
        let queued = sem.core.lock().inner.async_waiters.len();
        crate::assert_with_log!(queued == 1, "registered", 1usize, queued);

        drop(fut);
        let queued = sem.core.lock().inner.async_waiters.len();
        crate::assert_with_log!(queued == 0, "deregistered", 0usize, queued);
        crate::test_complete!("dropped_pending_future_deregisters");
    }

    #[test]
    fn woken_then_dropped_future_hands_wake_on() {
        init_test("woken_then_dropped_future_hands_wake_on");
        let sem = CountingSemaphore::new(0, 1).expect("valid");
        let mut first = sem.acquire_async();
        let mut second = sem.acquire_async();
        assert!(future::block_on(future::poll_once(&mut first)).is_none());
        assert!(future::block_on(future::poll_once(&mut second)).is_none());

        // Wakes `first` only; `first` is then abandoned.
        sem.release().expect("release");
        drop(first);

        let done = future::block_on(future::poll_once(&mut second));
        crate::assert_with_log!(done.is_some(), "second claims the unit", "Some", done);
        crate::assert_with_log!(sem.available() == 0, "unit consumed", 0usize, sem.available());
        crate::test_complete!("woken_then_dropped_future_hands_wake_on");
    }

    #[test]
    fn forgotten_permit_keeps_unit() {
        init_test("forgotten_permit_keeps_unit");
        let sem = CountingSemaphore::new(1, 1).expect("valid");
        sem.try_acquire_permit().expect("available").forget();
        crate::assert_with_log!(sem.available() == 0, "kept", 0usize, sem.available());
        crate::test_complete!("forgotten_permit_keeps_unit");
    }
}
