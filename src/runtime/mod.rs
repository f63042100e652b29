//! Worker pool runtime.
//!
//! - [`config`]: pool configuration types
//! - [`env_config`]: environment and TOML overrides
//! - [`builder`]: the move-based [`WorkerPoolBuilder`]
//! - [`worker_pool`]: the fixed-size [`WorkerPool`]
//! - [`task_handle`]: [`TaskHandle`] for waiting on submitted work
//! - [`worker_context`]: per-worker state lent to each task
//!
//! # Quick Start
//!
//! ```
//! use threadsync::WorkerPool;
//!
//! let pool = WorkerPool::new(2).unwrap();
//! let handle = pool.submit(|| "done").unwrap();
//! assert_eq!(handle.join(), Ok("done"));
//! ```
//!
//! # Config File + Environment Overrides
//!
//! ```ignore
//! use threadsync::WorkerPoolBuilder;
//!
//! // Requires the `config-file` feature.
//! let pool = WorkerPoolBuilder::from_toml("config/pool.toml")?
//!     .with_env_overrides()?
//!     .build()?;
//! ```
//!
//! # Configuration Reference (Defaults + Notes)
//!
//! - `worker_threads`: default = available parallelism (min 1).
//! - `queue_capacity`: default = 1024. `submit` blocks while the queue is full.
//! - `thread_stack_size`: default = 2 MiB.
//! - `thread_name_prefix`: default = `threadsync-worker`. Threads are named `{prefix}-{index}`.
//! - `drain_on_drop`: default = true. Dropping a running pool finishes queued work.
//! - `on_thread_start/stop`: lifecycle hooks; a panicking hook is logged and ignored.

pub mod builder;
pub mod config;
pub mod env_config;
pub mod task_handle;
pub mod worker_context;
pub mod worker_pool;

pub use builder::WorkerPoolBuilder;
pub use config::{PoolConfig, ThreadHook};
pub use task_handle::{TaskError, TaskHandle, TaskId};
pub use worker_context::WorkerContext;
pub use worker_pool::{PoolState, PoolStats, WorkerPool};
