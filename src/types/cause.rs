//! The failure algebra.
//!
//! A [`Cause`] records everything that went wrong in a computation: typed
//! failures ([`Cause::Fail`]), defects ([`Cause::Die`]) and interruptions
//! ([`Cause::Interrupt`]), combined either sequentially (one happened after
//! the other, e.g. a finalizer failing while unwinding) or in parallel.
//!
//! # Laws
//!
//! Equality is semantic rather than structural:
//!
//! - `Sequential` and `Parallel` are associative
//! - `Empty` is a two-sided identity for both
//! - `Parallel` is commutative (branches compare as a multiset)
//!
//! so `Cause::sequential(Cause::empty(), c) == c` holds for every `c` even
//! when the constructors are bypassed and the enum is built by hand.

use super::fiber_id::{FiberId, SingleId};
use core::fmt;
use std::any::Any;

/// An unexpected, untyped failure.
///
/// Panics captured while polling fiber code are converted into defects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Defect {
    message: String,
}

impl Defect {
    /// Creates a defect with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Converts a caught panic payload into a defect.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        Self::new(payload_to_string(payload))
    }

    /// Returns the defect message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "defect: {}", self.message)
    }
}

pub(crate) fn payload_to_string(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "<non-string panic payload>".to_string())
}

/// Marker returned by suspension points when the current fiber has been
/// interrupted.
///
/// Converts into any [`Cause`], so `?` unwinds a fiber body that returns
/// `Result<_, Cause<E>>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interrupted {
    by: FiberId,
}

impl Interrupted {
    /// Creates an interruption attributed to `by`.
    #[must_use]
    pub const fn new(by: FiberId) -> Self {
        Self { by }
    }

    /// Returns the interrupting identity.
    #[must_use]
    pub const fn by(&self) -> &FiberId {
        &self.by
    }
}

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "interrupted by {}", self.by)
    }
}

impl std::error::Error for Interrupted {}

impl<E> From<Interrupted> for Cause<E> {
    fn from(interrupted: Interrupted) -> Self {
        Self::Interrupt(interrupted.by)
    }
}

impl<E> From<Defect> for Cause<E> {
    fn from(defect: Defect) -> Self {
        Self::Die(defect)
    }
}

/// The full failure information of a computation.
#[derive(Debug, Clone)]
pub enum Cause<E> {
    /// No failure.
    Empty,
    /// An expected, typed failure.
    Fail(E),
    /// An unexpected defect.
    Die(Defect),
    /// Interruption attributed to the given fiber(s).
    Interrupt(FiberId),
    /// `left` happened, then `right`.
    Sequential(Box<Cause<E>>, Box<Cause<E>>),
    /// `left` and `right` happened concurrently.
    Parallel(Box<Cause<E>>, Box<Cause<E>>),
}

impl<E> Default for Cause<E> {
    fn default() -> Self {
        Self::Empty
    }
}

/// A fold over the shape of a [`Cause`].
///
/// Each case receives the payload of one node; composite cases receive the
/// already-reduced children.
pub trait CauseReducer<E> {
    /// Result of the fold.
    type Output;

    /// `Empty` node.
    fn empty_case(&mut self) -> Self::Output;
    /// `Fail` leaf.
    fn fail_case(&mut self, error: &E) -> Self::Output;
    /// `Die` leaf.
    fn die_case(&mut self, defect: &Defect) -> Self::Output;
    /// `Interrupt` leaf.
    fn interrupt_case(&mut self, fiber_id: &FiberId) -> Self::Output;
    /// `Sequential` node.
    fn sequential_case(&mut self, left: Self::Output, right: Self::Output) -> Self::Output;
    /// `Parallel` node.
    fn parallel_case(&mut self, left: Self::Output, right: Self::Output) -> Self::Output;
}

/// Single representative of a cause, for presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Squashed<E> {
    /// First typed failure.
    Fail(E),
    /// First defect, when there was no typed failure.
    Die(Defect),
    /// Only interruptions (or nothing at all) were recorded.
    Interrupted(FiberId),
}

impl<E: fmt::Display> fmt::Display for Squashed<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fail(e) => write!(f, "{e}"),
            Self::Die(d) => write!(f, "{d}"),
            Self::Interrupted(by) => write!(f, "fiber interrupted by {by}"),
        }
    }
}

impl<E> Cause<E> {
    /// The empty cause.
    #[must_use]
    pub const fn empty() -> Self {
        Self::Empty
    }

    /// A typed failure.
    #[must_use]
    pub const fn fail(error: E) -> Self {
        Self::Fail(error)
    }

    /// A defect.
    #[must_use]
    pub const fn die(defect: Defect) -> Self {
        Self::Die(defect)
    }

    /// A defect built from a message.
    #[must_use]
    pub fn die_message(message: impl Into<String>) -> Self {
        Self::Die(Defect::new(message))
    }

    /// An interruption attributed to `by`.
    #[must_use]
    pub const fn interrupt(by: FiberId) -> Self {
        Self::Interrupt(by)
    }

    /// Sequential composition, collapsing empty operands.
    #[must_use]
    pub fn sequential(left: Self, right: Self) -> Self {
        if left.is_empty() {
            right
        } else if right.is_empty() {
            left
        } else {
            Self::Sequential(Box::new(left), Box::new(right))
        }
    }

    /// Parallel composition, collapsing empty operands.
    #[must_use]
    pub fn parallel(left: Self, right: Self) -> Self {
        if left.is_empty() {
            right
        } else if right.is_empty() {
            left
        } else {
            Self::Parallel(Box::new(left), Box::new(right))
        }
    }

    /// `self` followed by `next`.
    #[must_use]
    pub fn then(self, next: Self) -> Self {
        Self::sequential(self, next)
    }

    /// `self` alongside `other`.
    #[must_use]
    pub fn both(self, other: Self) -> Self {
        Self::parallel(self, other)
    }

    /// Iterates over the `Fail`, `Die` and `Interrupt` leaves in pre-order,
    /// left to right. `Empty` nodes are skipped.
    #[must_use]
    pub fn leaves(&self) -> Leaves<'_, E> {
        Leaves { stack: vec![self] }
    }

    /// Returns true if the cause contains no failure at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leaves().next().is_none()
    }

    /// Returns true if the cause contains a typed failure.
    #[must_use]
    pub fn is_fail(&self) -> bool {
        self.leaves().any(|leaf| matches!(leaf, Self::Fail(_)))
    }

    /// Returns true if the cause contains a defect.
    #[must_use]
    pub fn is_die(&self) -> bool {
        self.leaves().any(|leaf| matches!(leaf, Self::Die(_)))
    }

    /// Returns true if the cause contains an interruption.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.leaves().any(|leaf| matches!(leaf, Self::Interrupt(_)))
    }

    /// Returns true if every leaf is an interruption.
    ///
    /// Vacuously true for a cause without leaves.
    #[must_use]
    pub fn is_interrupted_only(&self) -> bool {
        self.leaves().all(|leaf| matches!(leaf, Self::Interrupt(_)))
    }

    /// Typed failures, left to right.
    #[must_use]
    pub fn failures(&self) -> Vec<&E> {
        self.leaves()
            .filter_map(|leaf| match leaf {
                Self::Fail(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    /// Defects, left to right.
    #[must_use]
    pub fn defects(&self) -> Vec<&Defect> {
        self.leaves()
            .filter_map(|leaf| match leaf {
                Self::Die(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    /// The combined identity of every interrupter recorded in the cause.
    #[must_use]
    pub fn interruptors(&self) -> FiberId {
        FiberId::combine_all(self.leaves().filter_map(|leaf| match leaf {
            Self::Interrupt(id) => Some(id),
            _ => None,
        }))
    }

    /// Collapses the cause into one representative: the first typed
    /// failure, else the first defect, else the interrupters.
    #[must_use]
    pub fn squash(&self) -> Squashed<E>
    where
        E: Clone,
    {
        if let Some(e) = self.failures().first() {
            return Squashed::Fail((*e).clone());
        }
        if let Some(d) = self.defects().first() {
            return Squashed::Die((*d).clone());
        }
        Squashed::Interrupted(self.interruptors())
    }

    /// Pushes `f` through every `Fail` leaf, keeping the structure.
    #[must_use]
    pub fn map<E2, F>(self, mut f: F) -> Cause<E2>
    where
        F: FnMut(E) -> E2,
    {
        self.map_with(&mut f)
    }

    fn map_with<E2, F>(self, f: &mut F) -> Cause<E2>
    where
        F: FnMut(E) -> E2,
    {
        match self {
            Self::Empty => Cause::Empty,
            Self::Fail(e) => Cause::Fail(f(e)),
            Self::Die(d) => Cause::Die(d),
            Self::Interrupt(id) => Cause::Interrupt(id),
            Self::Sequential(l, r) => {
                let l = (*l).map_with(f);
                Cause::Sequential(Box::new(l), Box::new((*r).map_with(f)))
            }
            Self::Parallel(l, r) => {
                let l = (*l).map_with(f);
                Cause::Parallel(Box::new(l), Box::new((*r).map_with(f)))
            }
        }
    }

    /// Folds the cause with `reducer`, children before parents.
    pub fn reduce<R>(&self, reducer: &mut R) -> R::Output
    where
        R: CauseReducer<E>,
    {
        match self {
            Self::Empty => reducer.empty_case(),
            Self::Fail(e) => reducer.fail_case(e),
            Self::Die(d) => reducer.die_case(d),
            Self::Interrupt(id) => reducer.interrupt_case(id),
            Self::Sequential(l, r) => {
                let l = l.reduce(reducer);
                let r = r.reduce(reducer);
                reducer.sequential_case(l, r)
            }
            Self::Parallel(l, r) => {
                let l = l.reduce(reducer);
                let r = r.reduce(reducer);
                reducer.parallel_case(l, r)
            }
        }
    }

    /// Returns true if any interruption in the cause was issued by a
    /// supervisor (its interrupter set contains [`SingleId::SUPERVISOR`]).
    #[must_use]
    pub fn is_supervised_interruption(&self) -> bool {
        self.reduce(&mut SupervisedInterruption)
    }

    fn canonical(&self) -> Canon<'_, E> {
        match self {
            Self::Empty => Canon::Seq(Vec::new()),
            Self::Fail(e) => Canon::Fail(e),
            Self::Die(d) => Canon::Die(d),
            Self::Interrupt(id) => Canon::Interrupt(id),
            Self::Sequential(l, r) => {
                let mut items = Vec::new();
                for side in [l.canonical(), r.canonical()] {
                    match side {
                        Canon::Seq(inner) => items.extend(inner),
                        other => items.push(other),
                    }
                }
                Canon::collapse(items, Canon::Seq)
            }
            Self::Parallel(l, r) => {
                let mut items = Vec::new();
                for side in [l.canonical(), r.canonical()] {
                    match side {
                        Canon::Par(inner) => items.extend(inner),
                        Canon::Seq(inner) if inner.is_empty() => {}
                        other => items.push(other),
                    }
                }
                Canon::collapse(items, Canon::Par)
            }
        }
    }
}

struct SupervisedInterruption;

impl<E> CauseReducer<E> for SupervisedInterruption {
    type Output = bool;

    fn empty_case(&mut self) -> bool {
        false
    }

    fn fail_case(&mut self, _error: &E) -> bool {
        false
    }

    fn die_case(&mut self, _defect: &Defect) -> bool {
        false
    }

    fn interrupt_case(&mut self, fiber_id: &FiberId) -> bool {
        fiber_id.contains(&SingleId::SUPERVISOR)
    }

    fn sequential_case(&mut self, left: bool, right: bool) -> bool {
        left || right
    }

    fn parallel_case(&mut self, left: bool, right: bool) -> bool {
        left || right
    }
}

/// Pre-order iterator over the leaves of a [`Cause`].
#[derive(Debug)]
pub struct Leaves<'a, E> {
    stack: Vec<&'a Cause<E>>,
}

impl<'a, E> Iterator for Leaves<'a, E> {
    type Item = &'a Cause<E>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.stack.pop() {
            match node {
                Cause::Empty => {}
                Cause::Sequential(l, r) | Cause::Parallel(l, r) => {
                    self.stack.push(r);
                    self.stack.push(l);
                }
                leaf => return Some(leaf),
            }
        }
        None
    }
}

/// Normal form used for semantic equality: flattened sequences compared in
/// order, flattened parallel groups compared as multisets.
enum Canon<'a, E> {
    Fail(&'a E),
    Die(&'a Defect),
    Interrupt(&'a FiberId),
    Seq(Vec<Canon<'a, E>>),
    Par(Vec<Canon<'a, E>>),
}

impl<'a, E> Canon<'a, E> {
    fn collapse(mut items: Vec<Self>, wrap: fn(Vec<Self>) -> Self) -> Self {
        match items.len() {
            0 => Canon::Seq(Vec::new()),
            1 => items.pop().unwrap_or(Canon::Seq(Vec::new())),
            _ => wrap(items),
        }
    }
}

impl<E: PartialEq> PartialEq for Canon<'_, E> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Fail(a), Self::Fail(b)) => a == b,
            (Self::Die(a), Self::Die(b)) => a == b,
            (Self::Interrupt(a), Self::Interrupt(b)) => a == b,
            (Self::Seq(a), Self::Seq(b)) => a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x == y),
            (Self::Par(a), Self::Par(b)) => {
                if a.len() != b.len() {
                    return false;
                }
                let mut used = vec![false; b.len()];
                a.iter().all(|x| {
                    let found = b
                        .iter()
                        .enumerate()
                        .find(|(i, y)| !used[*i] && x == *y)
                        .map(|(i, _)| i);
                    found.is_some_and(|i| {
                        used[i] = true;
                        true
                    })
                })
            }
            _ => false,
        }
    }
}

impl<E: PartialEq> PartialEq for Cause<E> {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl<E: Eq> Eq for Cause<E> {}

impl<E: fmt::Display> fmt::Display for Cause<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty"),
            Self::Fail(e) => write!(f, "Fail({e})"),
            Self::Die(d) => write!(f, "Die({})", d.message()),
            Self::Interrupt(id) => write!(f, "Interrupt({id})"),
            Self::Sequential(l, r) => write!(f, "({l} ; {r})"),
            Self::Parallel(l, r) => write!(f, "({l} | {r})"),
        }
    }
}
