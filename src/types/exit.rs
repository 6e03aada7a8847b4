//! Terminal outcome of a fiber.
//!
//! An [`Exit`] is either a success value or the [`Cause`] of failure. Every
//! fiber produces exactly one, and every observer of that fiber sees a clone
//! of the same value.

use super::cause::{Cause, Defect};
use super::fiber_id::FiberId;
use core::fmt;

/// The terminal outcome of a computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit<A, E> {
    /// Completed with a value.
    Success(A),
    /// Completed with a failure.
    Failure(Cause<E>),
}

impl<E> Exit<(), E> {
    /// A successful unit exit.
    #[must_use]
    pub const fn unit() -> Self {
        Self::Success(())
    }
}

impl<A, E> Exit<A, E> {
    /// A successful exit.
    #[must_use]
    pub const fn succeed(value: A) -> Self {
        Self::Success(value)
    }

    /// A typed failure.
    #[must_use]
    pub const fn fail(error: E) -> Self {
        Self::Failure(Cause::Fail(error))
    }

    /// A failure with an arbitrary cause.
    #[must_use]
    pub const fn fail_cause(cause: Cause<E>) -> Self {
        Self::Failure(cause)
    }

    /// A defect.
    #[must_use]
    pub const fn die(defect: Defect) -> Self {
        Self::Failure(Cause::Die(defect))
    }

    /// An interruption attributed to `by`.
    #[must_use]
    pub const fn interrupt(by: FiberId) -> Self {
        Self::Failure(Cause::Interrupt(by))
    }

    /// Returns true for [`Exit::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns true for [`Exit::Failure`].
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Returns true if the exit is a failure whose cause contains an
    /// interruption.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.cause().is_some_and(Cause::is_interrupted)
    }

    /// Returns true if the exit is a failure made only of interruptions.
    #[must_use]
    pub fn is_interrupted_only(&self) -> bool {
        self.cause().is_some_and(Cause::is_interrupted_only)
    }

    /// Returns the success value, if any.
    #[must_use]
    pub const fn value(&self) -> Option<&A> {
        match self {
            Self::Success(v) => Some(v),
            Self::Failure(_) => None,
        }
    }

    /// Returns the failure cause, if any.
    #[must_use]
    pub const fn cause(&self) -> Option<&Cause<E>> {
        match self {
            Self::Success(_) => None,
            Self::Failure(c) => Some(c),
        }
    }

    /// Maps the success value.
    pub fn map<B, F: FnOnce(A) -> B>(self, f: F) -> Exit<B, E> {
        match self {
            Self::Success(v) => Exit::Success(f(v)),
            Self::Failure(c) => Exit::Failure(c),
        }
    }

    /// Maps every typed failure in the cause.
    pub fn map_err<E2, G: FnMut(E) -> E2>(self, g: G) -> Exit<A, E2> {
        match self {
            Self::Success(v) => Exit::Success(v),
            Self::Failure(c) => Exit::Failure(c.map(g)),
        }
    }

    /// Drops the success value.
    #[must_use]
    pub fn as_unit(&self) -> Exit<(), E>
    where
        E: Clone,
    {
        match self {
            Self::Success(_) => Exit::Success(()),
            Self::Failure(c) => Exit::Failure(c.clone()),
        }
    }

    /// Appends `cause` after this exit's own failure.
    ///
    /// A success followed by a non-empty cause becomes that cause; an empty
    /// cause leaves the exit unchanged.
    #[must_use]
    pub fn append_cause(self, cause: Cause<E>) -> Self {
        if cause.is_empty() {
            return self;
        }
        match self {
            Self::Success(_) => Self::Failure(cause),
            Self::Failure(c) => Self::Failure(c.then(cause)),
        }
    }

    /// Converts into a standard `Result`.
    pub fn into_result(self) -> Result<A, Cause<E>> {
        match self {
            Self::Success(v) => Ok(v),
            Self::Failure(c) => Err(c),
        }
    }

    /// Returns the success value or panics.
    ///
    /// # Panics
    ///
    /// Panics if the exit is a failure.
    #[track_caller]
    pub fn unwrap(self) -> A
    where
        E: fmt::Debug,
    {
        match self {
            Self::Success(v) => v,
            Self::Failure(c) => panic!("called `Exit::unwrap()` on a `Failure` value: {c:?}"),
        }
    }

    /// Returns the failure cause or panics.
    ///
    /// # Panics
    ///
    /// Panics if the exit is a success.
    #[track_caller]
    pub fn unwrap_cause(self) -> Cause<E> {
        match self {
            Self::Success(_) => panic!("called `Exit::unwrap_cause()` on a `Success` value"),
            Self::Failure(c) => c,
        }
    }

    /// Returns the success value or a default.
    pub fn unwrap_or(self, default: A) -> A {
        match self {
            Self::Success(v) => v,
            Self::Failure(_) => default,
        }
    }
}

impl<A, E> From<Result<A, Cause<E>>> for Exit<A, E> {
    fn from(result: Result<A, Cause<E>>) -> Self {
        match result {
            Ok(v) => Self::Success(v),
            Err(c) => Self::Failure(c),
        }
    }
}

impl<A: fmt::Display, E: fmt::Display> fmt::Display for Exit<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(v) => write!(f, "Success({v})"),
            Self::Failure(c) => write!(f, "Failure({c})"),
        }
    }
}
