//! Runtime builder and handles.

use crate::cx::Cx;
use crate::error::Error;
use crate::fiber::{spawn, Fiber};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::env_config::apply_env_overrides;
use crate::runtime::scheduler::{Scheduler, WorkerPool};
use crate::runtime::timer::TimerDriver;
use crate::types::{Cause, Exit, FiberId};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// State shared by every fiber forked on one runtime.
pub(crate) struct RuntimeShared {
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) timer: TimerDriver,
    next_id: AtomicI64,
    next_start: AtomicU64,
}

impl RuntimeShared {
    /// Allocates the identity of a new fiber.
    pub(crate) fn next_fiber_id(&self) -> FiberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let start = self.next_start.fetch_add(1, Ordering::Relaxed);
        FiberId::make(id, start)
    }

    fn shutdown(&self) {
        self.scheduler.shutdown();
        self.timer.shutdown();
    }
}

impl fmt::Debug for RuntimeShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeShared")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("pending_timers", &self.timer.pending())
            .finish_non_exhaustive()
    }
}

/// Builder for constructing a runtime with custom configuration.
#[derive(Clone)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl RuntimeBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            scheduler: None,
        }
    }

    /// Set the number of worker threads.
    #[must_use]
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.config.worker_threads = n;
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

    /// Run fibers on `scheduler` instead of the built-in worker pool.
    ///
    /// The thread settings of this builder are then ignored, except for the
    /// name prefix, which still names the timer thread.
    #[must_use]
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Apply `FIBERSCOPE_*` environment variable overrides.
    ///
    /// Environment values take precedence over anything set on the builder
    /// so far.
    pub fn with_env_overrides(mut self) -> Result<Self, Error> {
        apply_env_overrides(&mut self.config)?;
        Ok(self)
    }

    /// Apply settings from a TOML document.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(mut self, toml_str: &str) -> Result<Self, Error> {
        let parsed = crate::runtime::env_config::parse_toml_str(toml_str)?;
        crate::runtime::env_config::apply_toml_config(&mut self.config, &parsed);
        Ok(self)
    }

    /// Apply settings from a TOML file.
    #[cfg(feature = "config-file")]
    pub fn from_toml_file(mut self, path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        let parsed = crate::runtime::env_config::parse_toml_file(path.as_ref())?;
        crate::runtime::env_config::apply_toml_config(&mut self.config, &parsed);
        Ok(self)
    }

    /// Build a runtime from this configuration.
    pub fn build(self) -> Result<Runtime, Error> {
        Runtime::start(self.config, self.scheduler)
    }

    /// Runtime with a single worker thread.
    #[must_use]
    pub fn current_thread() -> Self {
        Self::new().worker_threads(1)
    }

    /// Multi-threaded runtime with defaults.
    #[must_use]
    pub fn multi_thread() -> Self {
        Self::new()
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("config", &self.config)
            .field("custom_scheduler", &self.scheduler.is_some())
            .finish()
    }
}

/// Runtime instance created from a [`RuntimeBuilder`].
///
/// Dropping the runtime stops its scheduler and timer. Fibers still
/// suspended at that point are never resumed.
pub struct Runtime {
    config: RuntimeConfig,
    shared: Arc<RuntimeShared>,
}

impl Runtime {
    /// Construct a runtime from the given configuration.
    pub fn with_config(config: RuntimeConfig) -> Result<Self, Error> {
        Self::start(config, None)
    }

    fn start(mut config: RuntimeConfig, scheduler: Option<Arc<dyn Scheduler>>) -> Result<Self, Error> {
        config.normalize();
        let scheduler: Arc<dyn Scheduler> = match scheduler {
            Some(scheduler) => scheduler,
            None => Arc::new(WorkerPool::new(config.worker_pool_options())?),
        };
        let timer = match TimerDriver::start(format!("{}-timer", config.thread_name_prefix)) {
            Ok(timer) => timer,
            Err(e) => {
                scheduler.shutdown();
                return Err(e);
            }
        };
        tracing::debug!(
            workers = config.worker_threads,
            prefix = %config.thread_name_prefix,
            "runtime started"
        );
        Ok(Self {
            config,
            shared: Arc::new(RuntimeShared {
                scheduler,
                timer,
                next_id: AtomicI64::new(1),
                next_start: AtomicU64::new(1),
            }),
        })
    }

    /// Returns a handle that can fork fibers from anywhere.
    #[must_use]
    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Forks an unsupervised fiber running `f`.
    pub fn fork<A, E, F, Fut>(&self, f: F) -> Fiber<A, E>
    where
        F: FnOnce(Cx) -> Fut + Send + 'static,
        Fut: Future<Output = Result<A, Cause<E>>> + Send + 'static,
        A: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        spawn(&self.shared, None, f)
    }

    /// Forks `f` and blocks the current thread until it finishes.
    ///
    /// Must not be called from a fiber.
    pub fn block_on<A, E, F, Fut>(&self, f: F) -> Exit<A, E>
    where
        F: FnOnce(Cx) -> Fut + Send + 'static,
        Fut: Future<Output = Result<A, Cause<E>>> + Send + 'static,
        A: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        self.fork(f).wait_blocking()
    }

    /// Returns a reference to the runtime configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        tracing::debug!("runtime shutting down");
        self.shared.shutdown();
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("shared", &self.shared)
            .finish()
    }
}

/// Handle for forking fibers onto a runtime.
#[derive(Clone, Debug)]
pub struct RuntimeHandle {
    shared: Arc<RuntimeShared>,
}

impl RuntimeHandle {
    /// Forks an unsupervised fiber running `f`.
    pub fn fork<A, E, F, Fut>(&self, f: F) -> Fiber<A, E>
    where
        F: FnOnce(Cx) -> Fut + Send + 'static,
        Fut: Future<Output = Result<A, Cause<E>>> + Send + 'static,
        A: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        spawn(&self.shared, None, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::scheduler::Job;
    use crate::test_utils::init_test_logging;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn block_on_returns_exit() {
        init_test_logging();
        crate::test_phase!("block_on_returns_exit");
        let runtime = RuntimeBuilder::current_thread().build().expect("runtime");
        let exit: Exit<u32, String> = runtime.block_on(|_| async { Ok(7) });
        assert_eq!(exit, Exit::succeed(7));
        let failed: Exit<(), String> =
            runtime.block_on(|_| async { Err(Cause::fail("nope".to_string())) });
        assert_eq!(failed, Exit::fail("nope".to_string()));
        crate::test_complete!("block_on_returns_exit");
    }

    #[test]
    fn fiber_ids_are_monotonic() {
        init_test_logging();
        let runtime = RuntimeBuilder::new().worker_threads(2).build().expect("runtime");
        let first: Fiber<(), ()> = runtime.fork(|_| async { Ok(()) });
        let second: Fiber<(), ()> = runtime.handle().fork(|_| async { Ok(()) });
        let (a, b) = (first.id().ids(), second.id().ids());
        let a = a.iter().next().copied().expect("single id");
        let b = b.iter().next().copied().expect("single id");
        assert!(a.id() < b.id());
        assert!(a.start_order() < b.start_order());
        let _ = first.wait_blocking();
        let _ = second.wait_blocking();
    }

    #[test]
    fn thread_callbacks_run() {
        init_test_logging();
        let started = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&started);
        let runtime = RuntimeBuilder::new()
            .worker_threads(2)
            .thread_name_prefix("callbacks")
            .on_thread_start(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .expect("runtime");
        let exit: Exit<(), ()> = runtime.block_on(|_| async { Ok(()) });
        assert!(exit.is_success());
        drop(runtime);
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    /// Runs every job on a thread of its own.
    struct ThreadPerJob {
        submitted: Mutex<usize>,
    }

    impl Scheduler for ThreadPerJob {
        fn submit(&self, job: Job) {
            *self.submitted.lock() += 1;
            std::thread::spawn(job);
        }
    }

    #[test]
    fn custom_scheduler_is_used() {
        init_test_logging();
        let scheduler = Arc::new(ThreadPerJob {
            submitted: Mutex::new(0),
        });
        let runtime = RuntimeBuilder::new()
            .scheduler(Arc::clone(&scheduler) as Arc<dyn Scheduler>)
            .build()
            .expect("runtime");
        let exit: Exit<u8, ()> = runtime.block_on(|cx| async move {
            cx.yield_now().await?;
            Ok(1)
        });
        assert_eq!(exit, Exit::succeed(1));
        assert!(*scheduler.submitted.lock() >= 2);
    }
}
