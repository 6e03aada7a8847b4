//! A keyed registry of fibers bound to a scope.
//!
//! A [`FiberMap`] holds at most one fiber per key. Registering a fiber
//! under a key that is already taken interrupts the previous occupant
//! (or, with [`SetOptions::only_if_missing`], the newcomer). Entries leave
//! the map on their own when their fiber finishes.
//!
//! The map is released with the [`Scope`] it was made on: closing the
//! scope interrupts and awaits every registered fiber, and from then on
//! every fiber handed to the map is interrupted instead of registered.
//!
//! # Failure propagation
//!
//! The first "real" failure of any registered fiber resolves the map's
//! failure cell, which [`FiberMap::join`] waits on. This includes fibers
//! that were already replaced under their key. Interruptions the map
//! issues itself are attributed to the caller combined with
//! [`FiberId::SUPERVISOR`]. By default no interruption-only exit
//! propagates. With [`SetOptions::propagate_interruption`] only exits
//! consisting purely of the map's own interruptions are filtered out. A
//! cause holding any `Fail` or `Die` leaf always propagates.
//!
//! ```ignore
//! scoped(&cx, |cx, scope| async move {
//!     let workers = FiberMap::<u32, (), String>::make(&cx, &scope).await?;
//!     for shard in 0..4 {
//!         workers.run(&cx, shard, move |cx| serve(cx, shard), SetOptions::default());
//!     }
//!     workers.join(&cx).await
//! })
//! .await
//! ```

use crate::cx::{Cx, Scope};
use crate::error::{Error, Result};
use crate::fiber::Fiber;
use crate::sync::Deferred;
use crate::types::{Cause, Exit, FiberId, Interrupted};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Weak};

/// Options for [`FiberMap::set`] and [`FiberMap::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Keep an existing entry and interrupt the incoming fiber instead.
    pub only_if_missing: bool,
    /// Propagate interruption-only exits to [`FiberMap::join`], except
    /// interruptions issued by the map itself.
    pub propagate_interruption: bool,
}

impl SetOptions {
    /// Options with [`only_if_missing`](Self::only_if_missing) set.
    #[must_use]
    pub const fn only_if_missing() -> Self {
        Self {
            only_if_missing: true,
            propagate_interruption: false,
        }
    }

    /// Options with [`propagate_interruption`](Self::propagate_interruption)
    /// set.
    #[must_use]
    pub const fn propagate_interruption() -> Self {
        Self {
            only_if_missing: false,
            propagate_interruption: true,
        }
    }

    fn propagates<E>(self, cause: &Cause<E>) -> bool {
        if !cause.is_interrupted_only() {
            return true;
        }
        self.propagate_interruption && !cause.is_supervised_interruption()
    }
}

struct Entry<A, E> {
    fiber: Fiber<A, E>,
    token: u64,
}

enum MapState<K, A, E> {
    Open {
        entries: HashMap<K, Entry<A, E>>,
        next_token: u64,
    },
    Closed,
}

struct Inner<K, A, E> {
    state: Mutex<MapState<K, A, E>>,
    failure: Deferred<(), E>,
}

/// A scoped registry of at most one fiber per key.
pub struct FiberMap<K, A, E> {
    inner: Arc<Inner<K, A, E>>,
}

impl<K, A, E> Clone for FiberMap<K, A, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, A, E> fmt::Debug for FiberMap<K, A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (closed, size) = match &*self.inner.state.lock() {
            MapState::Open { entries, .. } => (false, entries.len()),
            MapState::Closed => (true, 0),
        };
        f.debug_struct("FiberMap")
            .field("closed", &closed)
            .field("size", &size)
            .finish()
    }
}

impl<K, A, E> FiberMap<K, A, E>
where
    K: Eq + Hash + Clone + Send + fmt::Debug + 'static,
    A: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Creates an open map released when `scope` closes.
    ///
    /// On an already-closed scope the map is returned closed.
    pub async fn make(cx: &Cx, scope: &Scope<E>) -> core::result::Result<Self, Cause<E>> {
        let map = Self {
            inner: Arc::new(Inner {
                state: Mutex::new(MapState::Open {
                    entries: HashMap::new(),
                    next_token: 0,
                }),
                failure: Deferred::new(),
            }),
        };
        let released = map.clone();
        scope
            .add_finalizer(cx, move |cx, _| async move {
                released.shutdown(&cx).await;
                Ok(())
            })
            .await?;
        Ok(map)
    }

    /// Registers `fiber` under `key`.
    ///
    /// - closed map: `fiber` is interrupted
    /// - `fiber` already registered under `key`: nothing happens
    /// - key taken and `only_if_missing`: `fiber` is interrupted, the
    ///   existing entry stays
    /// - key taken otherwise: the previous fiber is interrupted and replaced
    pub fn set(&self, cx: &Cx, key: K, fiber: Fiber<A, E>, options: SetOptions) {
        let by = supervised(cx);
        let registered = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                MapState::Closed => None,
                MapState::Open {
                    entries,
                    next_token,
                } => {
                    let occupant_is_same = entries.get(&key).map(|entry| entry.fiber == fiber);
                    match occupant_is_same {
                        Some(true) => return,
                        Some(false) if options.only_if_missing => None,
                        _ => {
                            let token = *next_token;
                            *next_token += 1;
                            let previous = entries.insert(
                                key.clone(),
                                Entry {
                                    fiber: fiber.clone(),
                                    token,
                                },
                            );
                            Some((token, previous.map(|entry| entry.fiber)))
                        }
                    }
                }
            }
        };
        let Some((token, evicted)) = registered else {
            tracing::debug!(key = ?key, fiber_id = %fiber.id(), "fiber rejected by map, interrupting");
            fiber.interrupt_fork(&by);
            return;
        };

        tracing::debug!(
            key = ?key,
            fiber_id = %fiber.id(),
            token,
            replaced = evicted.is_some(),
            "fiber registered"
        );
        if let Some(previous) = evicted {
            previous.interrupt_fork(&by);
        }

        let map = Arc::downgrade(&self.inner);
        fiber.add_observer(move |exit| on_fiber_exit(&map, &key, token, options, exit));
    }

    /// Forks `f` as a daemon fiber and registers it under `key`.
    ///
    /// When the map is closed, or `only_if_missing` is set and the key is
    /// taken, `f` is not started and an already-interrupted fiber is
    /// returned.
    pub fn run<F, Fut>(&self, cx: &Cx, key: K, f: F, options: SetOptions) -> Fiber<A, E>
    where
        F: FnOnce(Cx) -> Fut + Send + 'static,
        Fut: Future<Output = core::result::Result<A, Cause<E>>> + Send + 'static,
    {
        {
            let state = self.inner.state.lock();
            match &*state {
                MapState::Closed => return Fiber::interrupted(supervised(cx)),
                MapState::Open { entries, .. }
                    if options.only_if_missing && entries.contains_key(&key) =>
                {
                    return Fiber::interrupted(FiberId::none());
                }
                MapState::Open { .. } => {}
            }
        }
        let fiber = cx.fork_daemon(f);
        self.set(cx, key, fiber.clone(), options);
        fiber
    }

    /// Returns the fiber registered under `key`.
    pub fn get(&self, key: &K) -> Result<Fiber<A, E>> {
        match &*self.inner.state.lock() {
            MapState::Open { entries, .. } => entries
                .get(key)
                .map(|entry| entry.fiber.clone())
                .ok_or_else(|| Error::not_found(format!("no fiber registered under {key:?}"))),
            MapState::Closed => Err(Error::not_found(format!(
                "fiber map is closed, no entry for {key:?}"
            ))),
        }
    }

    /// Returns true if a fiber is registered under `key`.
    #[must_use]
    pub fn has(&self, key: &K) -> bool {
        match &*self.inner.state.lock() {
            MapState::Open { entries, .. } => entries.contains_key(key),
            MapState::Closed => false,
        }
    }

    /// Number of registered fibers. Zero once closed.
    #[must_use]
    pub fn size(&self) -> usize {
        match &*self.inner.state.lock() {
            MapState::Open { entries, .. } => entries.len(),
            MapState::Closed => 0,
        }
    }

    /// Keys of the registered fibers, in no particular order.
    #[must_use]
    pub fn keys(&self) -> Vec<K> {
        match &*self.inner.state.lock() {
            MapState::Open { entries, .. } => entries.keys().cloned().collect(),
            MapState::Closed => Vec::new(),
        }
    }

    /// Returns true once the owning scope has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(&*self.inner.state.lock(), MapState::Closed)
    }

    /// Interrupts the fiber under `key`, on behalf of the caller, and waits
    /// for it. The entry leaves the map when the fiber finishes.
    pub async fn remove(&self, cx: &Cx, key: &K) {
        let fiber = match &*self.inner.state.lock() {
            MapState::Open { entries, .. } => entries.get(key).map(|entry| entry.fiber.clone()),
            MapState::Closed => None,
        };
        if let Some(fiber) = fiber {
            tracing::debug!(key = ?key, fiber_id = %fiber.id(), "removing fiber");
            let _ = fiber.interrupt(cx).await;
        }
    }

    /// Interrupts every registered fiber and waits for all of them.
    ///
    /// Unlike [`remove`](Self::remove), the interrupts are tagged with
    /// [`FiberId::SUPERVISOR`], so a cleared fiber that only reports the
    /// interruption stays quiet even under
    /// [`SetOptions::propagate_interruption`]. `remove` targets one fiber on
    /// the caller's behalf and is reported like any external interrupt.
    pub async fn clear(&self, cx: &Cx) {
        let fibers = match &*self.inner.state.lock() {
            MapState::Open { entries, .. } => entries
                .values()
                .map(|entry| entry.fiber.clone())
                .collect::<Vec<_>>(),
            MapState::Closed => return,
        };
        interrupt_all(cx, fibers).await;
    }

    /// Waits until a registered fiber fails in a way that propagates, or
    /// the map is closed.
    ///
    /// Returns the propagated cause, `Ok(())` after close, or the caller's
    /// interruption.
    pub async fn join(&self, cx: &Cx) -> core::result::Result<(), Cause<E>> {
        self.inner.failure.wait(cx).await
    }

    /// Waits until the map is empty or closed.
    pub async fn await_empty(&self, cx: &Cx) -> core::result::Result<(), Interrupted> {
        loop {
            let next = match &*self.inner.state.lock() {
                MapState::Open { entries, .. } => {
                    entries.values().next().map(|entry| entry.fiber.clone())
                }
                MapState::Closed => None,
            };
            let Some(fiber) = next else {
                return Ok(());
            };
            fiber.await_exit(cx).await?;
        }
    }

    async fn shutdown(&self, cx: &Cx) {
        let entries = {
            let mut state = self.inner.state.lock();
            match std::mem::replace(&mut *state, MapState::Closed) {
                MapState::Open { entries, .. } => entries,
                MapState::Closed => return,
            }
        };
        tracing::debug!(
            fiber_id = %cx.id(),
            entries = entries.len(),
            "closing fiber map"
        );
        interrupt_all(cx, entries.into_values().map(|entry| entry.fiber).collect()).await;
        self.inner.failure.succeed(());
    }
}

/// The caller's id tagged with the supervisor sentinel.
fn supervised(cx: &Cx) -> FiberId {
    cx.id().combine(&FiberId::SUPERVISOR)
}

async fn interrupt_all<A, E>(cx: &Cx, fibers: Vec<Fiber<A, E>>)
where
    A: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    let by = supervised(cx);
    for fiber in &fibers {
        fiber.interrupt_fork(&by);
    }
    for fiber in fibers {
        let _ = fiber.join(cx).await;
    }
}

fn on_fiber_exit<K, A, E>(
    map: &Weak<Inner<K, A, E>>,
    key: &K,
    token: u64,
    options: SetOptions,
    exit: &Exit<A, E>,
) where
    K: Eq + Hash + fmt::Debug,
    A: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    let Some(inner) = map.upgrade() else {
        return;
    };
    {
        let mut state = inner.state.lock();
        let MapState::Open { entries, .. } = &mut *state else {
            return;
        };
        // A replaced fiber must not evict its successor.
        if entries.get(key).map(|entry| entry.token) == Some(token) {
            entries.remove(key);
            tracing::trace!(key = ?key, token, success = exit.is_success(), "fiber entry evicted");
        }
    }

    if let Some(cause) = exit.cause() {
        if options.propagates(cause) {
            tracing::debug!(key = ?key, "propagating fiber failure to map");
            inner.failure.fail_cause(cause.clone());
        }
    }
}
