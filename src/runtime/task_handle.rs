//! Task handles for observing submitted work.
//!
//! `TaskHandle<T>` is returned by [`WorkerPool::submit`](super::WorkerPool::submit)
//! and lets the submitter wait for the task's result, register continuations,
//! request cooperative cancellation, or poll the task as a `Future`.
//!
//! # Continuations
//!
//! - [`TaskHandle::on_complete`] observes the result by reference; any number
//!   can be registered.
//! - [`TaskHandle::on_success`] / [`TaskHandle::on_failure`] run only for the
//!   matching outcome.
//! - [`TaskHandle::then`] consumes the handle, takes the result by value and
//!   returns a new handle for the continuation's own result.
//!
//! All of them run on the worker thread that finished the task, or on the
//! registering thread if the task had already finished.
//!
//! # Ownership
//!
//! The handle does not own the task; the pool does. Dropping the handle
//! detaches it: the task still runs and its result is discarded.

use crate::cancel::CancellationToken;
use crate::error::panic_message;
use crate::sync::ManualResetEvent;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

/// Identifier of a submitted task, unique within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Why a task produced no value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The task panicked; the payload is rendered as text.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The task was cancelled: skipped before it started, or stopped itself
    /// after observing the request.
    #[error("task was cancelled")]
    Cancelled,
    /// The pool shut down without draining and dropped the task unrun.
    #[error("task was discarded by a non-draining shutdown")]
    Discarded,
    /// The result was already taken by an earlier poll or `try_join`.
    #[error("task result was already taken")]
    ResultTaken,
}

type Continuation<T> = Box<dyn FnOnce(&Result<T, TaskError>) + Send>;
type Successor<T> = Box<dyn FnOnce(Result<T, TaskError>) + Send>;

struct Slot<T> {
    result: Option<Result<T, TaskError>>,
    finished: bool,
    continuations: Vec<Continuation<T>>,
    successor: Option<Successor<T>>,
    waker: Option<Waker>,
}

/// Shared completion state between a queued task and its handle.
pub(crate) struct Completion<T> {
    id: TaskId,
    slot: Mutex<Slot<T>>,
    done: ManualResetEvent,
    cancel: CancellationToken,
}

impl<T> Completion<T> {
    pub(crate) fn new(id: TaskId, cancel: CancellationToken) -> Self {
        Self {
            id,
            slot: Mutex::new(Slot {
                result: None,
                finished: false,
                continuations: Vec::new(),
                successor: None,
                waker: None,
            }),
            done: ManualResetEvent::new(false),
            cancel,
        }
    }

    pub(crate) const fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Publishes the result and runs continuations on the calling thread.
    ///
    /// Continuations run without the slot lock held. Any registered while
    /// earlier ones run are picked up before the result is published. A
    /// successor installed by [`TaskHandle::then`] receives the result by
    /// value last; the slot then stays empty.
    pub(crate) fn complete(&self, result: Result<T, TaskError>) {
        let (waker, handoff) = loop {
            let pending = {
                let mut slot = self.slot.lock();
                if slot.continuations.is_empty() {
                    slot.finished = true;
                    let waker = slot.waker.take();
                    match slot.successor.take() {
                        Some(successor) => break (waker, Some((successor, result))),
                        None => {
                            slot.result = Some(result);
                            break (waker, None);
                        }
                    }
                }
                std::mem::take(&mut slot.continuations)
            };
            for continuation in pending {
                run_continuation(self.id, continuation, &result);
            }
        };
        self.done.set();
        if let Some(waker) = waker {
            waker.wake();
        }
        if let Some((successor, result)) = handoff {
            successor(result);
        }
    }
}

fn run_continuation<T>(id: TaskId, continuation: Continuation<T>, result: &Result<T, TaskError>) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| continuation(result))) {
        tracing::warn!(
            task_id = %id,
            panic = %panic_message(payload.as_ref()),
            "task continuation panicked"
        );
    }
}

/// A handle to a submitted task.
///
/// ```
/// use threadsync::WorkerPool;
///
/// let pool = WorkerPool::new(1).unwrap();
/// let handle = pool.submit(|| 6 * 7).unwrap();
/// assert_eq!(handle.join(), Ok(42));
/// ```
pub struct TaskHandle<T> {
    completion: Arc<Completion<T>>,
}

impl<T> TaskHandle<T> {
    pub(crate) const fn new(completion: Arc<Completion<T>>) -> Self {
        Self { completion }
    }

    /// Returns the task's id.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.completion.id
    }

    /// Returns whether the task has finished (successfully or not).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.completion.done.is_set()
    }

    /// Blocks until the task finishes.
    pub fn wait(&self) {
        self.completion.done.wait();
    }

    /// Blocks until the task finishes or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.completion.done.wait_timeout(timeout)
    }

    /// Blocks until the task finishes and returns its result.
    pub fn join(self) -> Result<T, TaskError> {
        self.completion.done.wait();
        self.take_result()
            .unwrap_or(Err(TaskError::ResultTaken))
    }

    /// Returns the result if the task has finished, without blocking.
    ///
    /// The result can be taken once; later calls report
    /// [`TaskError::ResultTaken`].
    pub fn try_join(&mut self) -> Option<Result<T, TaskError>> {
        if !self.is_finished() {
            return None;
        }
        Some(self.take_result().unwrap_or(Err(TaskError::ResultTaken)))
    }

    fn take_result(&self) -> Option<Result<T, TaskError>> {
        self.completion.slot.lock().result.take()
    }

    /// Requests cancellation.
    ///
    /// A task that has not started yet is skipped and completes with
    /// [`TaskError::Cancelled`]. A running task observes the request through
    /// [`WorkerContext::checkpoint`](super::WorkerContext::checkpoint); one
    /// submitted with [`WorkerPool::submit_cancellable`](super::WorkerPool::submit_cancellable)
    /// ends as cancelled by returning that error.
    pub fn cancel(&self) {
        if self.completion.cancel.cancel() {
            tracing::trace!(task_id = %self.completion.id, "task cancellation requested");
        }
    }

    /// Returns whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.completion.cancel.is_cancelled()
    }

    /// Registers a continuation that receives the task's result.
    ///
    /// The continuation runs on the worker thread right after the task
    /// finishes, or immediately on the calling thread if the task has
    /// already finished. A panicking continuation is logged and ignored.
    /// If the result has already been taken, the continuation is dropped.
    pub fn on_complete<F>(&self, continuation: F)
    where
        F: FnOnce(&Result<T, TaskError>) + Send + 'static,
    {
        let mut slot = self.completion.slot.lock();
        if !slot.finished {
            slot.continuations.push(Box::new(continuation));
            return;
        }
        match &slot.result {
            Some(result) => run_continuation(self.completion.id, Box::new(continuation), result),
            None => tracing::debug!(
                task_id = %self.completion.id,
                "continuation dropped: result already taken"
            ),
        }
    }
}

impl<T: Send + 'static> TaskHandle<T> {
    /// Runs `func` only if the task succeeded, with a reference to its value.
    pub fn on_success<F>(&self, func: F)
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.on_complete(move |result| {
            if let Ok(value) = result {
                func(value);
            }
        });
    }

    /// Runs `func` only if the task failed, was cancelled or was discarded.
    pub fn on_failure<F>(&self, func: F)
    where
        F: FnOnce(&TaskError) + Send + 'static,
    {
        self.on_complete(move |result| {
            if let Err(err) = result {
                func(err);
            }
        });
    }

    /// Chains a continuation that takes the result by value.
    ///
    /// Returns a handle for the continuation's result. It shares this task's
    /// [`TaskId`] and has its own cancellation: cancelling it before this task
    /// finishes skips `func` and completes it with [`TaskError::Cancelled`].
    /// A panic in `func` completes it with [`TaskError::Panicked`].
    ///
    /// ```
    /// use threadsync::WorkerPool;
    ///
    /// let pool = WorkerPool::new(1).unwrap();
    /// let doubled = pool
    ///     .submit(|| 21)
    ///     .unwrap()
    ///     .then(|r| r.map(|v| v * 2).unwrap_or(0));
    /// assert_eq!(doubled.join(), Ok(42));
    /// ```
    pub fn then<U, F>(self, func: F) -> TaskHandle<U>
    where
        U: Send + 'static,
        F: FnOnce(Result<T, TaskError>) -> U + Send + 'static,
    {
        let id = self.completion.id;
        let next = Arc::new(Completion::new(id, CancellationToken::new()));
        let target = Arc::clone(&next);
        let successor: Successor<T> = Box::new(move |result| {
            if target.cancel_token().is_cancelled() {
                tracing::trace!(task_id = %id, "chained continuation cancelled before start");
                target.complete(Err(TaskError::Cancelled));
                return;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| func(result))).map_err(|payload| {
                let message = panic_message(payload.as_ref());
                tracing::warn!(task_id = %id, panic = %message, "chained continuation panicked");
                TaskError::Panicked(message)
            });
            target.complete(outcome);
        });

        let mut slot = self.completion.slot.lock();
        if slot.finished {
            let result = slot.result.take().unwrap_or(Err(TaskError::ResultTaken));
            drop(slot);
            successor(result);
        } else {
            slot.successor = Some(successor);
        }
        TaskHandle::new(next)
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.completion.slot.lock();
        if slot.finished {
            return Poll::Ready(slot.result.take().unwrap_or(Err(TaskError::ResultTaken)));
        }
        match &mut slot.waker {
            Some(waker) if waker.will_wake(cx.waker()) => {}
            other => *other = Some(cx.waker().clone()),
        }
        Poll::Pending
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.completion.id)
            .field("finished", &self.is_finished())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
