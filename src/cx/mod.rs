//! Fiber context and resource scopes.
//!
//! The [`Cx`] type is the handle every fiber body receives: it carries the
//! fiber's identity and its interruptibility regions, and it is the only way
//! to suspend, sleep or fork. [`Scope`] groups finalizers released together.
//!
//! # Module Contents
//!
//! - [`Cx`]: the fiber context
//! - [`Restore`]: token handed out by [`Cx::uninterruptible_mask`]
//! - [`Scope`] and [`scoped`]: finalizer registries bound to a computation

pub mod cx;
pub mod scope;

pub use cx::{Cx, Restore};
pub use scope::{scoped, Scope};
