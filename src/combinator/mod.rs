//! Combinators for structured concurrency.
//!
//! - [`acquire_release`](bracket::acquire_release): acquire/use/release with
//!   interrupt-safe release
//! - [`ensuring`](bracket::ensuring), [`on_exit`](bracket::on_exit),
//!   [`on_interrupt`](bracket::on_interrupt): finalizers derived from it
//! - [`disconnect`](disconnect::disconnect): let cleanup finish in the
//!   background when the caller is interrupted
//! - [`forever`](forever::forever): repeat until failure or interruption

pub mod bracket;
pub mod disconnect;
pub mod forever;

pub use bracket::{acquire_release, ensuring, on_exit, on_interrupt};
pub use disconnect::disconnect;
pub use forever::forever;
