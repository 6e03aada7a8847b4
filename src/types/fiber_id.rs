//! Fiber identity.
//!
//! A [`FiberId`] names one fiber, a set of fibers, or nobody. It is the
//! attribution token threaded through interrupt requests: every interrupt
//! records who asked for it, and a fiber interrupted by several parties
//! reports all of them as one composite id.
//!
//! Combination is normalized into a set, so it is associative, commutative
//! and idempotent, and [`FiberId::None`] is its identity.

use core::fmt;
use core::hash::{Hash, Hasher};
use std::collections::BTreeSet;

/// The identity of exactly one fiber.
///
/// Ordered by `id`, then `start_order`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SingleId {
    id: i64,
    start_order: u64,
}

impl SingleId {
    /// Reserved identity used to tag interrupts issued by a supervisor
    /// (for example a [`FiberMap`](crate::fiber_map::FiberMap) shutting down
    /// its entries).
    pub const SUPERVISOR: Self = Self::new(-1, 0);

    /// Creates a single identity.
    #[must_use]
    pub const fn new(id: i64, start_order: u64) -> Self {
        Self { id, start_order }
    }

    /// Returns the numeric id.
    #[must_use]
    pub const fn id(&self) -> i64 {
        self.id
    }

    /// Returns the start order assigned when the fiber was forked.
    #[must_use]
    pub const fn start_order(&self) -> u64 {
        self.start_order
    }
}

impl fmt::Display for SingleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::SUPERVISOR {
            write!(f, "#supervisor")
        } else {
            write!(f, "#{}", self.id)
        }
    }
}

/// Identity of a fiber or of a combination of fibers.
///
/// [`FiberId::combine`] keeps `Composite` at two or more members. A
/// hand-built `Composite` with fewer members is still equal to (and hashes
/// like) the `Single` or `None` it denotes.
#[derive(Debug, Clone, Default)]
pub enum FiberId {
    /// No identity.
    #[default]
    None,
    /// Exactly one fiber.
    Single(SingleId),
    /// Two or more fibers.
    Composite(BTreeSet<SingleId>),
}

impl FiberId {
    /// The supervisor sentinel as a fiber id.
    pub const SUPERVISOR: Self = Self::Single(SingleId::SUPERVISOR);

    /// Returns the empty identity.
    #[must_use]
    pub const fn none() -> Self {
        Self::None
    }

    /// Creates the identity of a single fiber.
    #[must_use]
    pub const fn make(id: i64, start_order: u64) -> Self {
        Self::Single(SingleId::new(id, start_order))
    }

    /// Returns true if the id denotes nobody.
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self.normal(), Normal::None)
    }

    /// Combines two identities into their normalized union.
    #[must_use]
    pub fn combine(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::None, _) => other.clone(),
            (_, Self::None) => self.clone(),
            _ => {
                let mut ids = self.ids();
                ids.extend(other.ids());
                Self::from_set(ids)
            }
        }
    }

    /// Combines every identity yielded by `ids`.
    pub fn combine_all<'a, I>(ids: I) -> Self
    where
        I: IntoIterator<Item = &'a Self>,
    {
        let mut set = BTreeSet::new();
        for id in ids {
            set.extend(id.ids());
        }
        Self::from_set(set)
    }

    /// Returns the flat set of single identities this id denotes.
    #[must_use]
    pub fn ids(&self) -> BTreeSet<SingleId> {
        match self {
            Self::None => BTreeSet::new(),
            Self::Single(single) => BTreeSet::from([*single]),
            Self::Composite(set) => set.clone(),
        }
    }

    /// Returns true if `single` is one of the identities denoted by `self`.
    #[must_use]
    pub fn contains(&self, single: &SingleId) -> bool {
        match self {
            Self::None => false,
            Self::Single(s) => s == single,
            Self::Composite(set) => set.contains(single),
        }
    }

    fn normal(&self) -> Normal<'_> {
        match self {
            Self::None => Normal::None,
            Self::Single(single) => Normal::Single(single),
            Self::Composite(set) => match set.len() {
                0 => Normal::None,
                1 => set.first().map_or(Normal::None, Normal::Single),
                _ => Normal::Composite(set),
            },
        }
    }

    fn from_set(mut set: BTreeSet<SingleId>) -> Self {
        match set.len() {
            0 => Self::None,
            1 => set.pop_first().map_or(Self::None, Self::Single),
            _ => Self::Composite(set),
        }
    }
}

/// Borrowed normal form used for equality, hashing and display.
#[derive(PartialEq, Eq, Hash)]
enum Normal<'a> {
    None,
    Single(&'a SingleId),
    Composite(&'a BTreeSet<SingleId>),
}

impl PartialEq for FiberId {
    fn eq(&self, other: &Self) -> bool {
        self.normal() == other.normal()
    }
}

impl Eq for FiberId {}

impl Hash for FiberId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normal().hash(state);
    }
}

impl From<SingleId> for FiberId {
    fn from(single: SingleId) -> Self {
        Self::Single(single)
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.normal() {
            Normal::None => write!(f, "#none"),
            Normal::Single(single) => write!(f, "{single}"),
            Normal::Composite(set) => {
                let mut first = true;
                for single in set {
                    if !first {
                        write!(f, "+")?;
                    }
                    first = false;
                    write!(f, "{single}")?;
                }
                Ok(())
            }
        }
    }
}
