//! Per-worker context handed to context-aware tasks.
//!
//! Each worker thread owns one `WorkerContext` for its whole life. Tasks
//! submitted with [`WorkerPool::submit_with_context`](super::WorkerPool::submit_with_context)
//! receive it by `&mut`, which gives them:
//!
//! - the worker's identity and how many tasks it has run,
//! - the running task's id and its cancellation state,
//! - typed *worker locals*: values that persist across every task the worker
//!   runs, keyed by type. This replaces thread-local storage with explicit
//!   state that the pool creates and drops with the worker.

use super::task_handle::TaskId;
use crate::cancel::{CancellationToken, Cancelled};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

/// State owned by one worker thread and lent to each task it runs.
pub struct WorkerContext {
    worker_index: usize,
    tasks_executed: u64,
    current: Option<(TaskId, CancellationToken)>,
    locals: HashMap<TypeId, Box<dyn Any + Send>>,
}

impl WorkerContext {
    pub(crate) fn new(worker_index: usize) -> Self {
        Self {
            worker_index,
            tasks_executed: 0,
            current: None,
            locals: HashMap::new(),
        }
    }

    pub(crate) fn begin_task(&mut self, id: TaskId, cancel: CancellationToken) {
        self.current = Some((id, cancel));
    }

    pub(crate) fn end_task(&mut self) {
        self.current = None;
        self.tasks_executed += 1;
    }

    /// Index of this worker within its pool, from zero.
    #[must_use]
    pub const fn worker_index(&self) -> usize {
        self.worker_index
    }

    /// Number of tasks this worker finished before the current one.
    #[must_use]
    pub const fn tasks_executed(&self) -> u64 {
        self.tasks_executed
    }

    /// Id of the task currently running, if any.
    #[must_use]
    pub fn task_id(&self) -> Option<TaskId> {
        self.current.as_ref().map(|(id, _)| *id)
    }

    /// Whether the running task's handle requested cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|(_, token)| token.is_cancelled())
    }

    /// Returns `Err(Cancelled)` if the running task should stop.
    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        match &self.current {
            Some((_, token)) => token.checkpoint(),
            None => Ok(()),
        }
    }

    /// Returns the running task's cancellation token.
    #[must_use]
    pub fn cancellation_token(&self) -> Option<&CancellationToken> {
        self.current.as_ref().map(|(_, token)| token)
    }

    /// Returns this worker's `T` local, creating it with `init` on first use.
    pub fn local_or_insert_with<T, F>(&mut self, init: F) -> &mut T
    where
        T: Any + Send,
        F: FnOnce() -> T,
    {
        self.locals
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(init()))
            .downcast_mut::<T>()
            .expect("worker local stored under a foreign TypeId")
    }

    /// Returns this worker's `T` local if it exists.
    #[must_use]
    pub fn get_local<T: Any + Send>(&self) -> Option<&T> {
        self.locals
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Removes and returns this worker's `T` local.
    pub fn remove_local<T: Any + Send>(&mut self) -> Option<T> {
        self.locals
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("worker_index", &self.worker_index)
            .field("tasks_executed", &self.tasks_executed)
            .field("task_id", &self.task_id())
            .field("locals", &self.locals.len())
            .finish()
    }
}
