//! Runtime state and scheduling.
//!
//! This module contains the machinery that drives fibers:
//!
//! - [`config`]: Runtime configuration types
//! - [`builder`]: Runtime builder and handles
//! - [`env_config`]: Environment and config-file overrides
//! - [`scheduler`]: The scheduling seam and the default worker pool
//! - `task`: The schedulable unit behind each fiber, with wake deduplication
//! - `timer`: Timer thread and deadline heap for sleeping fibers
//!
//! # Runtime Builder
//!
//! The runtime is configured with a fluent, move-based builder API. Each
//! builder method consumes `self` and returns an updated builder, enabling
//! ergonomic chaining without borrowing hazards.
//!
//! ## Quick Start
//!
//! ```ignore
//! use fiberscope::runtime::RuntimeBuilder;
//!
//! let runtime = RuntimeBuilder::new().build()?;
//! let exit = runtime.block_on(|cx| async move {
//!     cx.sleep(Duration::from_millis(5)).await?;
//!     Ok::<_, Cause<String>>(42)
//! });
//! ```
//!
//! ## Single Worker
//!
//! ```ignore
//! let runtime = RuntimeBuilder::current_thread().build()?;
//! ```
//!
//! ## Environment Overrides
//!
//! ```ignore
//! // FIBERSCOPE_WORKER_THREADS=8 overrides the value set in code.
//! let runtime = RuntimeBuilder::new()
//!     .worker_threads(2)
//!     .with_env_overrides()?
//!     .build()?;
//! ```
//!
//! ## Custom Scheduler
//!
//! Anything implementing [`Scheduler`] can drive fibers:
//!
//! ```ignore
//! let runtime = RuntimeBuilder::new().scheduler(Arc::new(MyPool::new())).build()?;
//! ```

pub mod builder;
pub mod config;
pub mod env_config;
pub mod scheduler;
pub(crate) mod task;
pub(crate) mod timer;

pub use builder::{Runtime, RuntimeBuilder, RuntimeHandle};
pub use config::RuntimeConfig;
pub use scheduler::{Job, Scheduler, WorkerPool, WorkerPoolOptions};
