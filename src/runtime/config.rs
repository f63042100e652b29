//! Worker pool configuration.
//!
//! In most cases you should use [`WorkerPoolBuilder`](super::builder::WorkerPoolBuilder)
//! to construct a pool rather than filling in a [`PoolConfig`] directly.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `worker_threads` | available CPU parallelism |
//! | `queue_capacity` | 1024 |
//! | `thread_stack_size` | 2 MiB |
//! | `thread_name_prefix` | `"threadsync-worker"` |
//! | `drain_on_drop` | true |

use std::fmt;
use std::sync::Arc;

/// Callback run on a worker thread when it starts or stops.
pub type ThreadHook = Arc<dyn Fn() + Send + Sync>;

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
/// Default worker thread stack size.
pub const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;
/// Default worker thread name prefix.
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "threadsync-worker";

/// Worker pool configuration.
#[derive(Clone)]
pub struct PoolConfig {
    /// Number of worker threads (default: available parallelism).
    pub worker_threads: usize,
    /// Maximum number of queued, not yet started tasks.
    pub queue_capacity: usize,
    /// Stack size per worker thread (default: 2MB).
    pub thread_stack_size: usize,
    /// Name prefix for worker threads.
    pub thread_name_prefix: String,
    /// Whether dropping a running pool finishes queued work (`true`) or
    /// discards it (`false`).
    pub drain_on_drop: bool,
    /// Callback when a worker thread starts.
    pub on_thread_start: Option<ThreadHook>,
    /// Callback when a worker thread stops.
    pub on_thread_stop: Option<ThreadHook>,
}

impl PoolConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.worker_threads == 0 {
            self.worker_threads = 1;
        }
        if self.queue_capacity == 0 {
            self.queue_capacity = 1;
        }
        if self.thread_stack_size == 0 {
            self.thread_stack_size = DEFAULT_STACK_SIZE;
        }
        if self.thread_name_prefix.is_empty() {
            self.thread_name_prefix = DEFAULT_THREAD_NAME_PREFIX.to_string();
        }
    }

    pub(crate) fn default_worker_threads() -> usize {
        std::thread::available_parallelism()
            .map_or(1, std::num::NonZeroUsize::get)
            .max(1)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_threads: Self::default_worker_threads(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            thread_stack_size: DEFAULT_STACK_SIZE,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            drain_on_drop: true,
            on_thread_start: None,
            on_thread_stop: None,
        }
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("worker_threads", &self.worker_threads)
            .field("queue_capacity", &self.queue_capacity)
            .field("thread_stack_size", &self.thread_stack_size)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .field("drain_on_drop", &self.drain_on_drop)
            .field("on_thread_start", &self.on_thread_start.is_some())
            .field("on_thread_stop", &self.on_thread_stop.is_some())
            .finish()
    }
}
