//! Environment variable and config file support for [`WorkerPoolBuilder`](super::builder::WorkerPoolBuilder).
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via builder methods (`worker_threads(4)`)
//! 2. **Environment variables**: values from `THREADSYNC_*` env vars
//! 3. **Config file**: values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults**: built-in defaults from [`PoolConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `THREADSYNC_WORKER_THREADS` | `usize` | `worker_threads` |
//! | `THREADSYNC_QUEUE_CAPACITY` | `usize` | `queue_capacity` |
//! | `THREADSYNC_THREAD_STACK_SIZE` | `usize` | `thread_stack_size` |
//! | `THREADSYNC_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |
//! | `THREADSYNC_DRAIN_ON_DROP` | `bool` | `drain_on_drop` |

use crate::error::{Error, ErrorKind, Result};
use crate::runtime::config::PoolConfig;

/// Environment variable name for worker thread count.
pub const ENV_WORKER_THREADS: &str = "THREADSYNC_WORKER_THREADS";
/// Environment variable name for the task queue capacity.
pub const ENV_QUEUE_CAPACITY: &str = "THREADSYNC_QUEUE_CAPACITY";
/// Environment variable name for thread stack size.
pub const ENV_THREAD_STACK_SIZE: &str = "THREADSYNC_THREAD_STACK_SIZE";
/// Environment variable name for thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "THREADSYNC_THREAD_NAME_PREFIX";
/// Environment variable name for the drop behaviour of a running pool.
pub const ENV_DRAIN_ON_DROP: &str = "THREADSYNC_DRAIN_ON_DROP";

/// Apply environment variable overrides to a [`PoolConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut PoolConfig) -> Result<()> {
    if let Some(val) = read_env(ENV_WORKER_THREADS) {
        config.worker_threads = parse_usize(ENV_WORKER_THREADS, &val)?;
    }
    if let Some(val) = read_env(ENV_QUEUE_CAPACITY) {
        config.queue_capacity = parse_usize(ENV_QUEUE_CAPACITY, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_STACK_SIZE) {
        config.thread_stack_size = parse_usize(ENV_THREAD_STACK_SIZE, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_NAME_PREFIX) {
        config.thread_name_prefix = val;
    }
    if let Some(val) = read_env(ENV_DRAIN_ON_DROP) {
        config.drain_on_drop = parse_bool(ENV_DRAIN_ON_DROP, &val)?;
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn config_error(msg: String) -> Error {
    Error::new(ErrorKind::Config).with_message(msg)
}

fn parse_usize(var_name: &str, val: &str) -> Result<usize> {
    val.trim().parse::<usize>().map_err(|e| {
        config_error(format!(
            "invalid value for {var_name}: expected unsigned integer, got {val:?} ({e})"
        ))
    })
}

fn parse_bool(var_name: &str, val: &str) -> Result<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(config_error(format!(
            "invalid value for {var_name}: expected bool (true/false/1/0/yes/no), got {val:?}"
        ))),
    }
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable pool configuration.
///
/// ```toml
/// [pool]
/// worker_threads = 4
/// queue_capacity = 256
/// thread_stack_size = 2097152
/// thread_name_prefix = "myapp-worker"
/// drain_on_drop = true
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct PoolTomlConfig {
    /// Pool settings.
    #[serde(default)]
    pub pool: PoolToml,
}

/// `[pool]` section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct PoolToml {
    /// Number of worker threads.
    pub worker_threads: Option<usize>,
    /// Queue capacity.
    pub queue_capacity: Option<usize>,
    /// Stack size per worker thread in bytes.
    pub thread_stack_size: Option<usize>,
    /// Name prefix for worker threads.
    pub thread_name_prefix: Option<String>,
    /// Drop behaviour of a running pool.
    pub drain_on_drop: Option<bool>,
}

/// Apply a parsed TOML config to a [`PoolConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut PoolConfig, toml: &PoolTomlConfig) {
    if let Some(v) = toml.pool.worker_threads {
        config.worker_threads = v;
    }
    if let Some(v) = toml.pool.queue_capacity {
        config.queue_capacity = v;
    }
    if let Some(v) = toml.pool.thread_stack_size {
        config.thread_stack_size = v;
    }
    if let Some(ref v) = toml.pool.thread_name_prefix {
        config.thread_name_prefix.clone_from(v);
    }
    if let Some(v) = toml.pool.drain_on_drop {
        config.drain_on_drop = v;
    }
}

/// Parse a TOML string into a [`PoolTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<PoolTomlConfig> {
    toml::from_str(toml_str).map_err(|e| {
        Error::new(ErrorKind::Config)
            .with_message("failed to parse TOML config")
            .with_source(e)
    })
}

/// Read and parse a TOML file into a [`PoolTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<PoolTomlConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::new(ErrorKind::Config)
            .with_message(format!("failed to read config file {}", path.display()))
            .with_source(e)
    })?;
    parse_toml_str(&content)
}

// =========================================================================
// Tests
// =========================================================================
