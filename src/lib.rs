//! Fiberscope: a structured-concurrency fiber runtime.
//!
//! # Overview
//!
//! Fiberscope runs lightweight fibers (futures with an identity, a status
//! and an interrupt protocol) on a pluggable scheduler, and reports how each
//! one ended as an [`Exit`]: a success value or a [`Cause`] tree recording
//! every typed failure, defect and interruption that happened along the way.
//!
//! # Core Guarantees
//!
//! - **Nothing is lost**: failures compose into a `Cause` tree, so a
//!   finalizer failing while unwinding an interruption is appended, never
//!   masking
//! - **Interrupts are cooperative and attributed**: an interrupt is delivered
//!   only at suspension points or checkpoints inside interruptible regions,
//!   and records who asked for it
//! - **Release always runs**: [`acquire_release`] acquires atomically with
//!   respect to interruption and releases whatever happens to the body
//! - **Supervision**: children forked with [`Cx::fork`] are interrupted when
//!   their parent finishes; a [`FiberMap`] interrupts its fibers when its
//!   scope closes
//!
//! # Module Structure
//!
//! - [`types`]: Fiber identity, failure causes and exits
//! - [`fiber`]: Fiber handles and lifecycle
//! - [`cx`]: The fiber context and resource scopes
//! - [`combinator`]: Acquire/release, finalizers, disconnect, repetition
//! - [`sync`]: Single-resolution cells
//! - [`fiber_map`]: Keyed, scope-bound fiber registry
//! - [`runtime`]: Builder, scheduler seam, worker pool, timer
//! - [`error`]: Error types for the runtime's own operations
//!
//! # Example
//!
//! ```ignore
//! use fiberscope::{Cause, RuntimeBuilder};
//! use std::time::Duration;
//!
//! let runtime = RuntimeBuilder::new().build()?;
//! let exit = runtime.block_on(|cx| async move {
//!     let child = cx.fork(|cx| async move {
//!         cx.sleep(Duration::from_secs(60)).await?;
//!         Ok::<_, Cause<String>>(())
//!     });
//!     let exit = child.interrupt(&cx).await;
//!     assert!(exit.is_interrupted_only());
//!     Ok::<_, Cause<String>>(())
//! });
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]

pub mod combinator;
pub mod cx;
pub mod error;
pub mod fiber;
pub mod fiber_map;
pub mod runtime;
pub mod sync;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use combinator::{acquire_release, disconnect, ensuring, forever, on_exit, on_interrupt};
pub use cx::{scoped, Cx, Restore, Scope};
pub use error::{Error, ErrorKind, Result};
pub use fiber::{Fiber, FiberStatus};
pub use fiber_map::{FiberMap, SetOptions};
pub use runtime::{Runtime, RuntimeBuilder, RuntimeConfig, RuntimeHandle, Scheduler};
pub use sync::Deferred;
pub use types::{Cause, Defect, Exit, FiberId, Interrupted};
