//! Environment variable and config file support for [`RuntimeBuilder`](super::builder::RuntimeBuilder).
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: builder methods called after the overrides are applied
//! 2. **Environment variables**: `FIBERSCOPE_*`
//! 3. **Config file**: a TOML file (requires the `config-file` feature)
//! 4. **Defaults**: [`RuntimeConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `FIBERSCOPE_WORKER_THREADS` | `usize` | `worker_threads` |
//! | `FIBERSCOPE_THREAD_STACK_SIZE` | `usize` | `thread_stack_size` |
//! | `FIBERSCOPE_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |

use crate::error::ConfigError;
use crate::runtime::config::RuntimeConfig;

/// Environment variable name for worker thread count.
pub const ENV_WORKER_THREADS: &str = "FIBERSCOPE_WORKER_THREADS";
/// Environment variable name for thread stack size.
pub const ENV_THREAD_STACK_SIZE: &str = "FIBERSCOPE_THREAD_STACK_SIZE";
/// Environment variable name for thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "FIBERSCOPE_THREAD_NAME_PREFIX";

/// Apply environment variable overrides to a [`RuntimeConfig`].
///
/// Only variables that are set are applied. An unparseable value is an
/// error rather than being silently ignored.
pub fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_WORKER_THREADS) {
        config.worker_threads = parse_usize(ENV_WORKER_THREADS, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_STACK_SIZE) {
        config.thread_stack_size = parse_usize(ENV_THREAD_STACK_SIZE, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_NAME_PREFIX) {
        config.thread_name_prefix = val;
    }
    Ok(())
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var_name: &str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidEnv {
            var: var_name.to_string(),
            expected: "unsigned integer",
            value: val.to_string(),
        })
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable runtime configuration.
///
/// ```toml
/// [scheduler]
/// worker_threads = 4
/// thread_stack_size = 2097152
/// thread_name_prefix = "myapp-worker"
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct RuntimeTomlConfig {
    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerToml,
}

/// Scheduler section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct SchedulerToml {
    /// Number of worker threads.
    pub worker_threads: Option<usize>,
    /// Stack size per worker thread in bytes.
    pub thread_stack_size: Option<usize>,
    /// Name prefix for worker threads.
    pub thread_name_prefix: Option<String>,
}

/// Apply a parsed TOML config to a [`RuntimeConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut RuntimeConfig, toml: &RuntimeTomlConfig) {
    if let Some(v) = toml.scheduler.worker_threads {
        config.worker_threads = v;
    }
    if let Some(v) = toml.scheduler.thread_stack_size {
        config.thread_stack_size = v;
    }
    if let Some(ref v) = toml.scheduler.thread_name_prefix {
        config.thread_name_prefix.clone_from(v);
    }
}

/// Parse a TOML string into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<RuntimeTomlConfig, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Read and parse a TOML file into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<RuntimeTomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_toml_str(&content)
}
