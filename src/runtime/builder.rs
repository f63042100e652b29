//! Worker pool builder.

use super::config::PoolConfig;
use super::env_config;
use super::worker_pool::WorkerPool;
use crate::error::Result;
use std::sync::Arc;

/// Builder for constructing a [`WorkerPool`] with custom configuration.
///
/// Each method consumes `self` and returns the updated builder. Settings
/// made through methods win over settings loaded before them, so the usual
/// chain is: load a source (`from_env`, `from_toml`), then override.
///
/// ```
/// use threadsync::WorkerPool;
///
/// let pool = WorkerPool::builder()
///     .worker_threads(2)
///     .queue_capacity(16)
///     .thread_name_prefix("doc-worker")
///     .build()
///     .unwrap();
/// assert_eq!(pool.worker_count(), 2);
/// assert_eq!(pool.queue_capacity(), 16);
/// ```
#[derive(Clone, Debug)]
pub struct WorkerPoolBuilder {
    config: PoolConfig,
}

impl WorkerPoolBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
        }
    }

    /// Create a builder from defaults with `THREADSYNC_*` environment
    /// overrides applied.
    pub fn from_env() -> Result<Self> {
        Self::new().with_env_overrides()
    }

    /// Apply `THREADSYNC_*` environment overrides to the current settings.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        env_config::apply_env_overrides(&mut self.config)?;
        Ok(self)
    }

    /// Create a builder from a TOML config file.
    #[cfg(feature = "config-file")]
    pub fn from_toml(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let parsed = env_config::parse_toml_file(path.as_ref())?;
        let mut builder = Self::new();
        env_config::apply_toml_config(&mut builder.config, &parsed);
        Ok(builder)
    }

    /// Create a builder from TOML text.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let parsed = env_config::parse_toml_str(toml)?;
        let mut builder = Self::new();
        env_config::apply_toml_config(&mut builder.config, &parsed);
        Ok(builder)
    }

    /// Set the number of worker threads.
    #[must_use]
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.config.worker_threads = n;
        self
    }

    /// Set the maximum number of queued tasks before `submit` blocks.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub fn thread_stack_size(mut self, size: usize) -> Self {
        self.config.thread_stack_size = size;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Choose whether dropping a running pool drains or discards its queue.
    #[must_use]
    pub fn drain_on_drop(mut self, drain: bool) -> Self {
        self.config.drain_on_drop = drain;
        self
    }

    /// Register a callback to run when a worker thread starts.
    #[must_use]
    pub fn on_thread_start<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.config.on_thread_start = Some(Arc::new(f));
        self
    }

    /// Register a callback to run when a worker thread stops.
    #[must_use]
    pub fn on_thread_stop<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.config.on_thread_stop = Some(Arc::new(f));
        self
    }

    /// Single-worker preset: tasks run one at a time in submission order.
    #[must_use]
    pub fn single_worker() -> Self {
        Self::new().worker_threads(1)
    }

    /// Returns the configuration built so far.
    #[must_use]
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Build a pool from this configuration.
    pub fn build(self) -> Result<WorkerPool> {
        WorkerPool::with_config(self.config)
    }
}

impl Default for WorkerPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}
