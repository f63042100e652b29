//! Reader/writer lock with writer preference.
//!
//! Any number of readers may hold the lock together; a writer holds it alone.
//! Like the primitive mutex, the lock guards a section of code rather than a
//! value, and it remembers which thread holds write access so misuse can be
//! reported instead of corrupting state.
//!
//! # Writer-Preference Fairness
//!
//! | Scenario                  | Behavior                                      |
//! |---------------------------|-----------------------------------------------|
//! | No writers waiting        | Readers acquire immediately                   |
//! | Writer waiting            | New readers blocked until no writer waits     |
//! | Existing readers + writer | Writer waits for all readers to release       |
//! | Writer releases           | Next waiting writer first, else all readers   |
//! | Waiting writer times out  | Readers re-admitted if it was the last writer |
//!
//! Writers park on a condition variable of their own, so the last reader out
//! wakes exactly one writer instead of the whole reader crowd.
//!
//! Reader starvation is possible under continuous write pressure.

use super::core::{deadline_after, CoreState, WaitableCore};
use crate::error::{Error, Result};
use parking_lot::Condvar;
use std::marker::PhantomData;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct RwState {
    readers: usize,
    waiting_writers: usize,
    writer: Option<ThreadId>,
}

impl RwState {
    const fn writer_active(&self) -> bool {
        self.writer.is_some()
    }
}

fn try_read(state: &mut CoreState<RwState>) -> Option<()> {
    if state.inner.writer_active() || state.inner.waiting_writers > 0 {
        return None;
    }
    state.inner.readers += 1;
    state.signaled = false;
    Some(())
}

fn try_write(state: &mut CoreState<RwState>, me: ThreadId) -> Option<()> {
    if state.inner.writer_active() || state.inner.readers > 0 {
        return None;
    }
    state.inner.writer = Some(me);
    state.signaled = false;
    Some(())
}

/// A writer-preferring shared/exclusive lock.
///
/// ```
/// use threadsync::ReaderWriterLock;
///
/// let lock = ReaderWriterLock::new();
/// {
///     let _a = lock.read().unwrap();
///     let _b = lock.read().unwrap();
///     assert_eq!(lock.readers(), 2);
///     assert!(lock.try_write().is_none());
/// }
/// let _w = lock.write().unwrap();
/// assert!(lock.is_write_locked());
/// ```
#[derive(Debug)]
pub struct ReaderWriterLock {
    core: WaitableCore<RwState>,
    writer_cv: Condvar,
}

impl Default for ReaderWriterLock {
    fn default() -> Self {
        Self::new()
    }
}

impl ReaderWriterLock {
    /// Creates an unheld lock.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            core: WaitableCore::with_state(
                true,
                RwState {
                    readers: 0,
                    waiting_writers: 0,
                    writer: None,
                },
            ),
            writer_cv: Condvar::new(),
        }
    }

    /// Returns the number of active readers.
    #[must_use]
    pub fn readers(&self) -> usize {
        self.core.lock().inner.readers
    }

    /// Returns whether a writer holds the lock.
    #[must_use]
    pub fn is_write_locked(&self) -> bool {
        self.core.lock().inner.writer_active()
    }

    /// Returns the number of writers blocked waiting for the lock.
    #[must_use]
    pub fn waiting_writers(&self) -> usize {
        self.core.lock().inner.waiting_writers
    }

    /// Blocks until read access is granted.
    ///
    /// Fails with `InvalidOperation` if the calling thread holds write access.
    pub fn acquire_read(&self) -> Result<()> {
        self.acquire_read_deadline(None).map(|_| ())
    }

    /// Blocks up to `timeout` for read access. `Ok(false)` means it timed out.
    pub fn acquire_read_timeout(&self, timeout: Duration) -> Result<bool> {
        self.acquire_read_deadline(deadline_after(Some(timeout)))
    }

    /// Takes read access only if it is available now.
    pub fn try_acquire_read(&self) -> bool {
        try_read(&mut self.core.lock()).is_some()
    }

    fn acquire_read_deadline(&self, deadline: Option<Instant>) -> Result<bool> {
        let me = thread::current().id();
        let mut state = self.core.lock();
        if state.inner.writer == Some(me) {
            return Err(Error::invalid_operation(
                "read access requested by the thread holding write access",
            ));
        }
        Ok(self.core.block_until(&mut state, deadline, try_read).is_some())
    }

    /// Gives up one reader's access.
    ///
    /// Fails with `InvalidOperation` if no reader holds the lock. The last
    /// reader out wakes one waiting writer.
    pub fn release_read(&self) -> Result<()> {
        let mut state = self.core.lock();
        if state.inner.readers == 0 {
            return Err(Error::invalid_operation("read released while not held"));
        }
        state.inner.readers -= 1;
        if state.inner.readers == 0 {
            state.signaled = true;
            if state.inner.waiting_writers > 0 {
                self.writer_cv.notify_one();
            }
        }
        Ok(())
    }

    /// Blocks until write access is granted.
    ///
    /// Fails with `InvalidOperation` if the calling thread already holds it.
    pub fn acquire_write(&self) -> Result<()> {
        self.acquire_write_deadline(None).map(|_| ())
    }

    /// Blocks up to `timeout` for write access. `Ok(false)` means it timed out.
    pub fn acquire_write_timeout(&self, timeout: Duration) -> Result<bool> {
        self.acquire_write_deadline(deadline_after(Some(timeout)))
    }

    /// Takes write access only if the lock is completely free.
    pub fn try_acquire_write(&self) -> bool {
        try_write(&mut self.core.lock(), thread::current().id()).is_some()
    }

    fn acquire_write_deadline(&self, deadline: Option<Instant>) -> Result<bool> {
        let me = thread::current().id();
        let mut state = self.core.lock();
        if state.inner.writer == Some(me) {
            return Err(Error::invalid_operation("recursive write acquisition"));
        }

        state.inner.waiting_writers += 1;
        let granted =
            WaitableCore::block_on(&self.writer_cv, &mut state, deadline, |s| try_write(s, me));
        state.inner.waiting_writers -= 1;

        if granted.is_none() && state.inner.waiting_writers == 0 && !state.inner.writer_active() {
            // The last waiting writer gave up; readers held back for it may go.
            self.core.notify_all();
        }
        Ok(granted.is_some())
    }

    /// Gives up write access.
    ///
    /// Fails with `InvalidOperation` unless the calling thread is the writer.
    /// Wakes the next waiting writer, or every waiting reader if none.
    pub fn release_write(&self) -> Result<()> {
        let me = thread::current().id();
        let mut state = self.core.lock();
        if state.inner.writer != Some(me) {
            return Err(Error::invalid_operation(
                "write released by a thread that does not hold it",
            ));
        }
        state.inner.writer = None;
        state.signaled = true;
        if state.inner.waiting_writers > 0 {
            self.writer_cv.notify_one();
        } else {
            self.core.notify_all();
        }
        Ok(())
    }

    /// Acquires read access, returning a guard that releases it on drop.
    pub fn read(&self) -> Result<ReadGuard<'_>> {
        self.acquire_read()?;
        Ok(ReadGuard { lock: self })
    }

    /// Read access if available without waiting.
    pub fn try_read(&self) -> Option<ReadGuard<'_>> {
        self.try_acquire_read().then_some(ReadGuard { lock: self })
    }

    /// Read access within `timeout`.
    pub fn try_read_for(&self, timeout: Duration) -> Result<Option<ReadGuard<'_>>> {
        Ok(self
            .acquire_read_timeout(timeout)?
            .then_some(ReadGuard { lock: self }))
    }

    /// Acquires write access, returning a guard that releases it on drop.
    pub fn write(&self) -> Result<WriteGuard<'_>> {
        self.acquire_write()?;
        Ok(WriteGuard::new(self))
    }

    /// Write access if available without waiting.
    pub fn try_write(&self) -> Option<WriteGuard<'_>> {
        self.try_acquire_write().then(|| WriteGuard::new(self))
    }

    /// Write access within `timeout`.
    pub fn try_write_for(&self, timeout: Duration) -> Result<Option<WriteGuard<'_>>> {
        Ok(self
            .acquire_write_timeout(timeout)?
            .then(|| WriteGuard::new(self)))
    }
}

/// Shared access to a [`ReaderWriterLock`].
#[must_use = "if unused the read access is released immediately"]
#[derive(Debug)]
pub struct ReadGuard<'a> {
    lock: &'a ReaderWriterLock,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.release_read() {
            tracing::warn!(error = %err, "read guard failed to release");
        }
    }
}

/// Exclusive access to a [`ReaderWriterLock`]. Bound to the acquiring thread.
#[must_use = "if unused the write access is released immediately"]
#[derive(Debug)]
pub struct WriteGuard<'a> {
    lock: &'a ReaderWriterLock,
    _not_send: PhantomData<*const ()>,
}

impl<'a> WriteGuard<'a> {
    const fn new(lock: &'a ReaderWriterLock) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.release_write() {
            tracing::warn!(error = %err, "write guard failed to release");
        }
    }
}
