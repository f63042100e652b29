//! Error types for threadsync.
//!
//! Failures are reported through a single [`Error`] carrying an [`ErrorKind`],
//! an optional message and an optional source. Timeouts are *not* errors:
//! every timed wait reports expiry through its return value.
//!
//! Task-level failures (panics, cancellation, discards) live on the task's
//! own handle as [`TaskError`](crate::runtime::TaskError) and never surface
//! here, except as the aggregated [`ErrorKind::TaskFailed`] reported by the
//! parallel loop helpers.

use core::fmt;
use std::any::Any;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A constructor or method argument was out of range.
    InvalidArgument,
    /// The call is not legal in the primitive's current state
    /// (foreign release, count underflow, semaphore overflow, recursive write).
    InvalidOperation,
    /// The worker pool no longer accepts work, or its queue is full.
    Rejected,
    /// A barrier's post-phase action failed for this phase.
    BrokenBarrier,
    /// One or more tasks in a parallel loop failed.
    TaskFailed,
    /// Configuration could not be parsed or loaded.
    Config,
    /// Internal failure such as a worker thread that could not be spawned.
    Internal,
}

impl ErrorKind {
    /// Returns true if retrying the same call later could succeed.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::BrokenBarrier | Self::TaskFailed)
    }

    /// Returns true if the error reflects caller misuse rather than runtime state.
    #[must_use]
    pub const fn is_misuse(self) -> bool {
        matches!(self, Self::InvalidArgument | Self::InvalidOperation)
    }
}

/// The main error type for threadsync operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Adds a message to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Shorthand for an [`ErrorKind::InvalidArgument`] error.
    #[must_use]
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument).with_message(msg)
    }

    /// Shorthand for an [`ErrorKind::InvalidOperation`] error.
    #[must_use]
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidOperation).with_message(msg)
    }

    /// Shorthand for an [`ErrorKind::Rejected`] error.
    #[must_use]
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Rejected).with_message(msg)
    }

    /// Returns true if this is a misuse error.
    #[must_use]
    pub const fn is_misuse(&self) -> bool {
        self.kind.is_misuse()
    }

    /// Returns true if the pool refused the submission.
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self.kind, ErrorKind::Rejected)
    }

    /// Returns true if a barrier phase was broken by its post-phase action.
    #[must_use]
    pub const fn is_broken_barrier(&self) -> bool {
        matches!(self.kind, ErrorKind::BrokenBarrier)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// A specialized Result type for threadsync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Renders a caught panic payload as text.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
