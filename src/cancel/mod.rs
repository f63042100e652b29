//! Cooperative cancellation.
//!
//! The blocking primitives never abort a wait on their own. Cancellation is a
//! request that code observes at points it chooses: a [`CancellationToken`]
//! is a shared flag that tasks poll through [`CancellationToken::checkpoint`],
//! or that a caller folds into a wait with [`CancellationToken::wait_with`],
//! which slices a long wait into bounded waits and re-checks the flag between
//! slices.
//!
//! ```
//! use std::time::Duration;
//! use threadsync::{CancellationToken, ManualResetEvent};
//!
//! let token = CancellationToken::new();
//! let event = ManualResetEvent::new(false);
//! token.cancel();
//! let result = token.wait_with(Duration::from_millis(1), |slice| event.wait_timeout(slice));
//! assert!(result.is_err());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default slice length used by [`CancellationToken::wait_with`] callers.
pub const DEFAULT_POLL_SLICE: Duration = Duration::from_millis(10);

/// Marker error: the operation observed a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// A shared, clonable cancellation flag.
///
/// Clones observe the same flag. Once cancelled, a token stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates an uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Returns true if this call made the transition.
    pub fn cancel(&self) -> bool {
        !self.flag.swap(true, Ordering::AcqRel)
    }

    /// Returns whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Returns `Err(Cancelled)` if cancellation was requested.
    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Repeats a bounded wait until it succeeds or the token is cancelled.
    ///
    /// `attempt` receives the slice length and returns whether the awaited
    /// condition was met (the shape of every `wait_timeout` in this crate).
    /// The flag is checked before each attempt.
    pub fn wait_with(
        &self,
        slice: Duration,
        mut attempt: impl FnMut(Duration) -> bool,
    ) -> Result<(), Cancelled> {
        loop {
            self.checkpoint()?;
            if attempt(slice) {
                return Ok(());
            }
        }
    }

    /// Returns whether two tokens share the same flag.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.flag, &other.flag)
    }
}
