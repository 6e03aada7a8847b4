//! Runtime configuration types.
//!
//! These types hold the concrete values that drive runtime behavior. In most
//! cases you should use [`RuntimeBuilder`](super::builder::RuntimeBuilder) to
//! construct a runtime rather than creating a [`RuntimeConfig`] directly.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `worker_threads` | available CPU parallelism |
//! | `thread_stack_size` | 2 MiB |
//! | `thread_name_prefix` | `"fiberscope-worker"` |

use crate::runtime::scheduler::WorkerPoolOptions;
use std::fmt;
use std::sync::Arc;

/// Default worker thread stack size.
pub const DEFAULT_THREAD_STACK_SIZE: usize = 2 * 1024 * 1024;

/// Default worker thread name prefix.
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "fiberscope-worker";

/// Runtime configuration.
#[derive(Clone)]
pub struct RuntimeConfig {
    /// Number of worker threads (default: available parallelism).
    pub worker_threads: usize,
    /// Stack size per worker thread (default: 2MB).
    pub thread_stack_size: usize,
    /// Name prefix for worker threads.
    pub thread_name_prefix: String,
    /// Callback executed when a worker thread starts.
    pub on_thread_start: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Callback executed when a worker thread stops.
    pub on_thread_stop: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl RuntimeConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.worker_threads == 0 {
            self.worker_threads = 1;
        }
        if self.thread_stack_size == 0 {
            self.thread_stack_size = DEFAULT_THREAD_STACK_SIZE;
        }
        if self.thread_name_prefix.is_empty() {
            self.thread_name_prefix = DEFAULT_THREAD_NAME_PREFIX.to_string();
        }
    }

    /// Returns the default worker thread count for this machine.
    #[must_use]
    pub fn default_worker_threads() -> usize {
        std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1)
    }

    pub(crate) fn worker_pool_options(&self) -> WorkerPoolOptions {
        WorkerPoolOptions {
            worker_threads: self.worker_threads,
            thread_stack_size: self.thread_stack_size,
            thread_name_prefix: self.thread_name_prefix.clone(),
            on_thread_start: self.on_thread_start.clone(),
            on_thread_stop: self.on_thread_stop.clone(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: Self::default_worker_threads(),
            thread_stack_size: DEFAULT_THREAD_STACK_SIZE,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            on_thread_start: None,
            on_thread_stop: None,
        }
    }
}

impl fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("worker_threads", &self.worker_threads)
            .field("thread_stack_size", &self.thread_stack_size)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .field("on_thread_start", &self.on_thread_start.is_some())
            .field("on_thread_stop", &self.on_thread_stop.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_replaces_zeroes() {
        let mut config = RuntimeConfig {
            worker_threads: 0,
            thread_stack_size: 0,
            thread_name_prefix: String::new(),
            ..RuntimeConfig::default()
        };
        config.normalize();
        assert_eq!(config.worker_threads, 1);
        assert_eq!(config.thread_stack_size, DEFAULT_THREAD_STACK_SIZE);
        assert_eq!(config.thread_name_prefix, DEFAULT_THREAD_NAME_PREFIX);
    }

    #[test]
    fn pool_options_mirror_config() {
        let config = RuntimeConfig {
            worker_threads: 3,
            thread_name_prefix: "svc".into(),
            ..RuntimeConfig::default()
        };
        let options = config.worker_pool_options();
        assert_eq!(options.worker_threads, 3);
        assert_eq!(options.thread_name_prefix, "svc");
    }
}
