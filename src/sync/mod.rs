//! Synchronization primitives for fibers.
//!
//! - [`Deferred`]: a cell completed once with an [`Exit`](crate::types::Exit),
//!   awaited by fibers or blocking threads
//!
//! Waiting on a [`Deferred`] is a suspension point: it parks the fiber
//! without blocking its worker thread.

mod deferred;
pub(crate) mod waiters;

pub use deferred::Deferred;
