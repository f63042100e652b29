//! Fixed-size worker pool.
//!
//! The pool runs submitted closures on a fixed set of OS threads, fed from a
//! bounded FIFO queue. It is assembled from this crate's own primitives:
//!
//! - `items` ([`CountingSemaphore`]): one unit per queued task, plus one
//!   sentinel unit per worker at shutdown. Workers block on it while idle.
//! - `slots` ([`CountingSemaphore`]): free queue capacity. Submitters block
//!   on it while the queue is full.
//! - `started` / `exited` ([`CountdownLatch`]): construction waits until every
//!   worker is up; shutdown waits until every worker is gone.
//! - `shutdown_signal` / `stopped` ([`ManualResetEvent`]): observable
//!   lifecycle transitions.
//!
//! # Lifecycle
//!
//! ```text
//! Running ──shutdown(drain)──► Draining ──all workers exited──► Stopped
//! ```
//!
//! `Running` accepts work. `Draining` rejects new work; with `drain = true`
//! the workers finish everything already queued, with `drain = false` the
//! queue is discarded and each discarded task's handle reports
//! [`TaskError::Discarded`]. `Stopped` is terminal.
//!
//! A task that panics is caught and recorded in its handle; the worker thread
//! survives and moves on to the next task.

use super::builder::WorkerPoolBuilder;
use super::config::{PoolConfig, ThreadHook};
use super::task_handle::{Completion, TaskError, TaskHandle, TaskId};
use super::worker_context::WorkerContext;
use crate::cancel::{CancellationToken, Cancelled};
use crate::error::{panic_message, Error, ErrorKind, Result};
use crate::sync::{CountdownLatch, CountingSemaphore, ManualResetEvent};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::ops::Range;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

/// Lifecycle state of a [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolState {
    /// Accepting and running work.
    Running,
    /// Shutting down; new work is rejected.
    Draining,
    /// All workers have exited.
    Stopped,
}

/// Point-in-time counters for a [`WorkerPool`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Tasks accepted by `submit`.
    pub submitted: u64,
    /// Tasks that ran to completion.
    pub completed: u64,
    /// Tasks that panicked.
    pub failed: u64,
    /// Tasks skipped because their handle was cancelled before they started,
    /// plus cancellable tasks that stopped with [`Cancelled`].
    pub cancelled: u64,
    /// Tasks dropped unrun by a non-draining shutdown.
    pub discarded: u64,
    /// Tasks currently queued and not yet started.
    pub pending: usize,
}

enum JobOutcome {
    Completed,
    Panicked,
    Cancelled,
}

/// A queued unit of work with its result type erased.
trait Job: Send {
    fn id(&self) -> TaskId;
    fn run(self: Box<Self>, ctx: &mut WorkerContext) -> JobOutcome;
    fn discard(self: Box<Self>);
}

struct TaskJob<T, F> {
    completion: Arc<Completion<T>>,
    func: F,
}

impl<T, F> Job for TaskJob<T, F>
where
    T: Send + 'static,
    F: FnOnce(&mut WorkerContext) -> std::result::Result<T, Cancelled> + Send + 'static,
{
    fn id(&self) -> TaskId {
        self.completion.id()
    }

    fn run(self: Box<Self>, ctx: &mut WorkerContext) -> JobOutcome {
        let Self { completion, func } = *self;
        let id = completion.id();
        let token = completion.cancel_token().clone();
        if token.is_cancelled() {
            tracing::trace!(task_id = %id, "skipping task cancelled before start");
            completion.complete(Err(TaskError::Cancelled));
            return JobOutcome::Cancelled;
        }

        ctx.begin_task(id, token);
        let result = catch_unwind(AssertUnwindSafe(|| func(ctx)));
        ctx.end_task();

        match result {
            Ok(Ok(value)) => {
                completion.complete(Ok(value));
                JobOutcome::Completed
            }
            Ok(Err(Cancelled)) => {
                tracing::trace!(task_id = %id, "task stopped on cancellation");
                completion.complete(Err(TaskError::Cancelled));
                JobOutcome::Cancelled
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::warn!(
                    task_id = %id,
                    worker = ctx.worker_index(),
                    panic = %message,
                    "task panicked"
                );
                completion.complete(Err(TaskError::Panicked(message)));
                JobOutcome::Panicked
            }
        }
    }

    fn discard(self: Box<Self>) {
        self.completion.complete(Err(TaskError::Discarded));
    }
}

struct Queue {
    state: PoolState,
    jobs: VecDeque<Box<dyn Job>>,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    discarded: AtomicU64,
}

struct PoolInner {
    queue: Mutex<Queue>,
    items: CountingSemaphore,
    slots: CountingSemaphore,
    started: CountdownLatch,
    exited: CountdownLatch,
    shutdown_signal: ManualResetEvent,
    stopped: ManualResetEvent,
    worker_ids: Mutex<Vec<ThreadId>>,
    next_task_id: AtomicU64,
    counters: Counters,
    worker_count: usize,
    queue_capacity: usize,
    on_thread_start: Option<ThreadHook>,
    on_thread_stop: Option<ThreadHook>,
}

impl PoolInner {
    fn release_slots(&self, n: usize) {
        if let Err(err) = self.slots.release_n(n) {
            tracing::error!(error = %err, "queue slot accounting out of balance");
        }
    }

    fn release_items(&self, n: usize) {
        if let Err(err) = self.items.release_n(n) {
            tracing::error!(error = %err, "queue item accounting out of balance");
        }
    }
}

/// A fixed-size pool of worker threads.
///
/// ```
/// use threadsync::WorkerPool;
///
/// let pool = WorkerPool::new(2).unwrap();
/// let handles: Vec<_> = (0..4).map(|i| pool.submit(move || i * 10).unwrap()).collect();
/// let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
/// assert_eq!(results, vec![0, 10, 20, 30]);
/// pool.shutdown(true);
/// assert!(pool.submit(|| ()).is_err());
/// ```
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    drain_on_drop: bool,
}

impl WorkerPool {
    /// Creates a pool with `workers` threads and default settings otherwise.
    ///
    /// Fails with `InvalidArgument` when `workers == 0`.
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(Error::invalid_argument("worker pool needs at least one worker"));
        }
        Self::with_config(PoolConfig {
            worker_threads: workers,
            ..PoolConfig::default()
        })
    }

    /// Returns a builder for configuring a pool.
    #[must_use]
    pub fn builder() -> WorkerPoolBuilder {
        WorkerPoolBuilder::new()
    }

    /// Creates a pool from an explicit configuration.
    ///
    /// Blocks until every worker thread has started.
    pub fn with_config(mut config: PoolConfig) -> Result<Self> {
        config.normalize();
        let workers = config.worker_threads;
        let capacity = config.queue_capacity;
        let item_limit = capacity
            .checked_add(workers)
            .ok_or_else(|| Error::invalid_argument("queue capacity plus workers overflows"))?;

        let inner = Arc::new(PoolInner {
            queue: Mutex::new(Queue {
                state: PoolState::Running,
                jobs: VecDeque::with_capacity(capacity.min(1024)),
            }),
            items: CountingSemaphore::new(0, item_limit)?,
            slots: CountingSemaphore::new(capacity, capacity)?,
            started: CountdownLatch::new(workers),
            exited: CountdownLatch::new(workers),
            shutdown_signal: ManualResetEvent::new(false),
            stopped: ManualResetEvent::new(false),
            worker_ids: Mutex::new(Vec::with_capacity(workers)),
            next_task_id: AtomicU64::new(1),
            counters: Counters::default(),
            worker_count: workers,
            queue_capacity: capacity,
            on_thread_start: config.on_thread_start.clone(),
            on_thread_stop: config.on_thread_stop.clone(),
        });

        let mut threads = Vec::with_capacity(workers);
        for index in 0..workers {
            match spawn_worker(&inner, &config, index) {
                Ok(handle) => threads.push(handle),
                Err(err) => {
                    abort_startup(&inner, threads);
                    return Err(Error::new(ErrorKind::Internal)
                        .with_message(format!("failed to spawn worker {index}"))
                        .with_source(err));
                }
            }
        }

        inner.started.wait();
        tracing::debug!(
            workers,
            queue_capacity = capacity,
            prefix = %config.thread_name_prefix,
            "worker pool started"
        );

        Ok(Self {
            inner,
            threads: Mutex::new(threads),
            drain_on_drop: config.drain_on_drop,
        })
    }

    /// Submits a closure, blocking while the queue is full.
    ///
    /// Fails with `Rejected` once shutdown has begun.
    pub fn submit<T, F>(&self, func: F) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.enqueue(move |_: &mut WorkerContext| Ok(func()), true)
    }

    /// Submits a closure that receives the worker's [`WorkerContext`].
    pub fn submit_with_context<T, F>(&self, func: F) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&mut WorkerContext) -> T + Send + 'static,
    {
        self.enqueue(move |ctx: &mut WorkerContext| Ok(func(ctx)), true)
    }

    /// Submits a context-aware closure that may stop early on cancellation.
    ///
    /// Returning `Err(Cancelled)`, typically by propagating
    /// [`WorkerContext::checkpoint`] with `?`, completes the handle with
    /// [`TaskError::Cancelled`] and counts the task as cancelled.
    ///
    /// ```
    /// use threadsync::{TaskError, WorkerPool};
    ///
    /// let pool = WorkerPool::new(1).unwrap();
    /// let handle = pool
    ///     .submit_cancellable(|ctx| {
    ///         loop {
    ///             ctx.checkpoint()?;
    ///             std::thread::yield_now();
    ///         }
    ///     })
    ///     .unwrap();
    /// handle.cancel();
    /// assert_eq!(handle.join(), Err::<(), _>(TaskError::Cancelled));
    /// ```
    pub fn submit_cancellable<T, F>(&self, func: F) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&mut WorkerContext) -> std::result::Result<T, Cancelled> + Send + 'static,
    {
        self.enqueue(func, true)
    }

    /// Submits a closure without blocking.
    ///
    /// Fails with `Rejected` if the queue is full or shutdown has begun.
    pub fn try_submit<T, F>(&self, func: F) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.enqueue(move |_: &mut WorkerContext| Ok(func()), false)
    }

    fn enqueue<T, F>(&self, func: F, block: bool) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&mut WorkerContext) -> std::result::Result<T, Cancelled> + Send + 'static,
    {
        if self.state() != PoolState::Running {
            return Err(Error::rejected("worker pool is not accepting work"));
        }
        if block {
            self.inner.slots.acquire();
        } else if !self.inner.slots.try_acquire() {
            return Err(Error::rejected("worker pool queue is at capacity"));
        }

        let id = TaskId::new(self.inner.next_task_id.fetch_add(1, Ordering::Relaxed));
        let completion = Arc::new(Completion::new(id, CancellationToken::new()));
        let job = Box::new(TaskJob {
            completion: Arc::clone(&completion),
            func,
        });

        {
            let mut queue = self.inner.queue.lock();
            if queue.state != PoolState::Running {
                drop(queue);
                self.inner.release_slots(1);
                return Err(Error::rejected("worker pool is not accepting work"));
            }
            queue.jobs.push_back(job);
        }
        self.inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.inner.release_items(1);
        tracing::trace!(task_id = %id, "task submitted");
        Ok(TaskHandle::new(completion))
    }

    /// Stops the pool and waits for every worker to exit.
    ///
    /// With `drain = true` queued tasks run first; with `drain = false` they
    /// are discarded. Idempotent: later or concurrent calls wait for the
    /// first shutdown to complete. Called from one of this pool's own
    /// workers, it begins the shutdown but does not wait.
    pub fn shutdown(&self, drain: bool) {
        self.begin_shutdown(drain);
        if self.is_worker_thread() {
            tracing::debug!("shutdown requested from a pool worker; not waiting");
            return;
        }
        self.finish_shutdown();
    }

    fn begin_shutdown(&self, drain: bool) {
        let discarded: Vec<Box<dyn Job>> = {
            let mut queue = self.inner.queue.lock();
            if queue.state != PoolState::Running {
                return;
            }
            queue.state = PoolState::Draining;
            if drain {
                Vec::new()
            } else {
                queue.jobs.drain(..).collect()
            }
        };
        self.inner.shutdown_signal.set();
        tracing::debug!(drain, discarded = discarded.len(), "worker pool shutting down");

        let count = discarded.len();
        for job in discarded {
            tracing::trace!(task_id = %job.id(), "discarding queued task");
            job.discard();
        }
        if count > 0 {
            self.inner
                .counters
                .discarded
                .fetch_add(count as u64, Ordering::Relaxed);
            self.inner.release_slots(count);
        }
        // One sentinel per worker: a permit with no task behind it.
        self.inner.release_items(self.inner.worker_count);
    }

    /// Joins every worker, then marks the pool stopped.
    ///
    /// The `threads` lock is held throughout, so a concurrent caller returns
    /// only after the first has joined and published `Stopped`.
    fn finish_shutdown(&self) {
        let mut threads = self.threads.lock();
        self.inner.exited.wait();
        for handle in threads.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("worker thread terminated abnormally");
            }
        }

        let mut queue = self.inner.queue.lock();
        if queue.state != PoolState::Stopped {
            queue.state = PoolState::Stopped;
            drop(queue);
            self.inner.stopped.set();
            tracing::debug!(stats = ?self.stats(), "worker pool stopped");
        }
        drop(threads);
    }

    /// Joins every worker except the calling one, whose handle is detached.
    ///
    /// Used when the pool is dropped from inside one of its own tasks. The
    /// calling worker exits on its own once the task returns.
    fn join_other_workers(&self) {
        let me = thread::current().id();
        let mut threads = self.threads.lock();
        for handle in threads.drain(..) {
            if handle.thread().id() == me {
                tracing::debug!("worker pool dropped on its own worker; detaching it");
                continue;
            }
            if handle.join().is_err() {
                tracing::warn!("worker thread terminated abnormally");
            }
        }
    }

    fn is_worker_thread(&self) -> bool {
        let me = thread::current().id();
        self.inner.worker_ids.lock().contains(&me)
    }

    /// Blocks until the pool reaches [`PoolState::Stopped`] or `timeout` elapses.
    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        self.inner.stopped.wait_timeout(timeout)
    }

    /// Returns whether shutdown has begun.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.inner.shutdown_signal.is_set()
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PoolState {
        self.inner.queue.lock().state
    }

    /// Returns the number of worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.inner.worker_count
    }

    /// Returns the queue capacity.
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.inner.queue_capacity
    }

    /// Returns the number of queued tasks not yet started.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.queue.lock().jobs.len()
    }

    /// Returns the number of tasks that ran to completion.
    #[must_use]
    pub fn completed_count(&self) -> u64 {
        self.inner.counters.completed.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of the pool's counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let c = &self.inner.counters;
        PoolStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
            discarded: c.discarded.load(Ordering::Relaxed),
            pending: self.pending_count(),
        }
    }

    /// Runs `body` for every index in `range` across the pool and waits.
    ///
    /// The range is split into contiguous chunks, a few per worker. If any
    /// chunk panics, the remaining chunks still run and the call reports
    /// [`ErrorKind::TaskFailed`].
    ///
    /// Must not be called from one of this pool's own tasks: the caller
    /// would occupy a worker while waiting for the others.
    pub fn parallel_for<F>(&self, range: Range<usize>, body: F) -> Result<()>
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        let len = range.len();
        if len == 0 {
            return Ok(());
        }
        let chunks = self.worker_count().saturating_mul(4).clamp(1, len);
        let chunk_size = len.div_ceil(chunks);
        let body = Arc::new(body);

        let mut handles = Vec::with_capacity(chunks);
        let mut start = range.start;
        while start < range.end {
            let end = start.saturating_add(chunk_size).min(range.end);
            let body = Arc::clone(&body);
            handles.push(self.submit(move || (start..end).for_each(|i| body(i)))?);
            start = end;
        }
        join_all(handles)
    }

    /// Runs `body` once per item across the pool and waits.
    ///
    /// Failure reporting matches [`parallel_for`](Self::parallel_for).
    pub fn parallel_for_each<I, F>(&self, items: I, body: F) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Send + 'static,
        F: Fn(I::Item) + Send + Sync + 'static,
    {
        let body = Arc::new(body);
        let handles = items
            .into_iter()
            .map(|item| {
                let body = Arc::clone(&body);
                self.submit(move || body(item))
            })
            .collect::<Result<Vec<_>>>()?;
        join_all(handles)
    }
}

fn join_all(handles: Vec<TaskHandle<()>>) -> Result<()> {
    let total = handles.len();
    let mut failed = 0_usize;
    let mut first: Option<TaskError> = None;
    for handle in handles {
        if let Err(err) = handle.join() {
            failed += 1;
            first.get_or_insert(err);
        }
    }
    match first {
        None => Ok(()),
        Some(err) => Err(Error::new(ErrorKind::TaskFailed)
            .with_message(format!("{failed} of {total} tasks failed; first: {err}"))),
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.state() == PoolState::Stopped {
            return;
        }
        if self.is_worker_thread() {
            self.begin_shutdown(self.drain_on_drop);
            self.join_other_workers();
        } else {
            self.shutdown(self.drain_on_drop);
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("state", &self.state())
            .field("workers", &self.inner.worker_count)
            .field("queue_capacity", &self.inner.queue_capacity)
            .field("pending", &self.pending_count())
            .finish()
    }
}

fn run_hook(hook: Option<&ThreadHook>, which: &'static str) {
    if let Some(hook) = hook {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| hook())) {
            tracing::warn!(
                hook = which,
                panic = %panic_message(payload.as_ref()),
                "worker thread hook panicked"
            );
        }
    }
}

fn spawn_worker(
    inner: &Arc<PoolInner>,
    config: &PoolConfig,
    index: usize,
) -> io::Result<JoinHandle<()>> {
    let inner = Arc::clone(inner);
    let name = format!("{}-{}", config.thread_name_prefix, index);

    thread::Builder::new()
        .name(name)
        .stack_size(config.thread_stack_size)
        .spawn(move || {
            inner.worker_ids.lock().push(thread::current().id());
            run_hook(inner.on_thread_start.as_ref(), "start");
            if let Err(err) = inner.started.signal() {
                tracing::error!(error = %err, "worker start accounting out of balance");
            }
            tracing::debug!(worker = index, "worker started");

            let mut ctx = WorkerContext::new(index);
            worker_loop(&inner, &mut ctx);
            let executed = ctx.tasks_executed();
            // Worker locals are dropped on their own thread.
            drop(ctx);

            run_hook(inner.on_thread_stop.as_ref(), "stop");
            tracing::debug!(worker = index, executed, "worker exiting");
            if let Err(err) = inner.exited.signal() {
                tracing::error!(error = %err, "worker exit accounting out of balance");
            }
        })
}

fn worker_loop(inner: &PoolInner, ctx: &mut WorkerContext) {
    loop {
        inner.items.acquire();
        let next = inner.queue.lock().jobs.pop_front();
        let Some(job) = next else {
            // A permit with an empty queue is a shutdown sentinel.
            break;
        };
        inner.release_slots(1);

        let counter = match job.run(ctx) {
            JobOutcome::Completed => &inner.counters.completed,
            JobOutcome::Panicked => &inner.counters.failed,
            JobOutcome::Cancelled => &inner.counters.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Unwinds a partially started pool after a spawn failure.
fn abort_startup(inner: &PoolInner, threads: Vec<JoinHandle<()>>) {
    inner.queue.lock().state = PoolState::Draining;
    inner.shutdown_signal.set();
    if !threads.is_empty() {
        inner.release_items(threads.len());
    }
    for handle in threads {
        let _ = handle.join();
    }
    inner.queue.lock().state = PoolState::Stopped;
    inner.stopped.set();
}
