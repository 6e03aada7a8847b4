//! Core value types: fiber identity, failure causes and exits.

pub mod cause;
pub mod exit;
pub mod fiber_id;

pub use cause::{Cause, CauseReducer, Defect, Interrupted, Leaves, Squashed};
pub use exit::Exit;
pub use fiber_id::{FiberId, SingleId};
