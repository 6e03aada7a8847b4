//! Single-resolution completion cell.
//!
//! A [`Deferred`] is completed at most once with an [`Exit`]. It is the
//! completion signal behind every [`Fiber`](crate::fiber::Fiber) and the
//! shared failure cell of a [`FiberMap`](crate::fiber_map::FiberMap).
//!
//! # Observers
//!
//! Callbacks registered with [`Deferred::add_observer`] run exactly once, in
//! registration order, on the completing thread and outside the lock. They
//! run *before* the exit becomes visible to waiters, so a joiner that wakes
//! up can rely on every observer having already run.

use crate::cx::Cx;
use crate::sync::waiters::WaiterSet;
use crate::types::cause::payload_to_string;
use crate::types::{Cause, Exit, Interrupted};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::task::Waker;

type Observer<A, E> = Box<dyn FnOnce(&Exit<A, E>) + Send + 'static>;

struct DeferredState<A, E> {
    exit: Option<Exit<A, E>>,
    completing: bool,
    waiters: WaiterSet,
    observers: Vec<Observer<A, E>>,
}

struct DeferredInner<A, E> {
    state: Mutex<DeferredState<A, E>>,
    done: Condvar,
}

/// A cell completed once with an [`Exit`].
pub struct Deferred<A, E> {
    inner: Arc<DeferredInner<A, E>>,
}

impl<A, E> Clone for Deferred<A, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, E> fmt::Debug for Deferred<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Deferred")
            .field("done", &state.exit.is_some())
            .field("waiters", &state.waiters.len())
            .field("observers", &state.observers.len())
            .finish()
    }
}

impl<A, E> Default for Deferred<A, E>
where
    A: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<A, E> Deferred<A, E>
where
    A: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Creates an unresolved cell.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DeferredInner {
                state: Mutex::new(DeferredState {
                    exit: None,
                    completing: false,
                    waiters: WaiterSet::new(),
                    observers: Vec::new(),
                }),
                done: Condvar::new(),
            }),
        }
    }

    /// Completes the cell. Returns false if it was already completed.
    pub fn complete(&self, exit: Exit<A, E>) -> bool {
        {
            let mut state = self.inner.state.lock();
            if state.completing {
                return false;
            }
            state.completing = true;
        }

        loop {
            let observers = {
                let mut state = self.inner.state.lock();
                if state.observers.is_empty() {
                    state.exit = Some(exit);
                    let wakers = state.waiters.take_all();
                    self.inner.done.notify_all();
                    drop(state);
                    for waker in wakers {
                        waker.wake();
                    }
                    return true;
                }
                std::mem::take(&mut state.observers)
            };
            for observer in observers {
                run_observer(observer, &exit);
            }
        }
    }

    /// Completes the cell with a success value.
    pub fn succeed(&self, value: A) -> bool {
        self.complete(Exit::succeed(value))
    }

    /// Completes the cell with a typed failure.
    pub fn fail(&self, error: E) -> bool {
        self.complete(Exit::fail(error))
    }

    /// Completes the cell with an arbitrary cause.
    pub fn fail_cause(&self, cause: Cause<E>) -> bool {
        self.complete(Exit::fail_cause(cause))
    }

    /// Returns true once the exit is visible.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.state.lock().exit.is_some()
    }

    /// Returns the exit if the cell is resolved.
    #[must_use]
    pub fn poll(&self) -> Option<Exit<A, E>> {
        self.inner.state.lock().exit.clone()
    }

    /// Runs `observer` with the exit once the cell resolves, or immediately
    /// if it already has.
    pub fn add_observer<F>(&self, observer: F)
    where
        F: FnOnce(&Exit<A, E>) + Send + 'static,
    {
        let exit = {
            let mut state = self.inner.state.lock();
            match state.exit {
                Some(ref exit) => exit.clone(),
                None => {
                    state.observers.push(Box::new(observer));
                    return;
                }
            }
        };
        run_observer(Box::new(observer), &exit);
    }

    /// Suspends until the cell resolves. Interruptible: an interrupt of the
    /// waiting fiber is returned instead.
    pub async fn await_exit(&self, cx: &Cx) -> Result<Exit<A, E>, Interrupted> {
        let mut waiter = DeferredWaiter::new(self);
        cx.suspend("deferred", |waker| waiter.poll(waker)).await
    }

    /// Suspends until the cell resolves and converts the exit into a
    /// `Result`. Interruption of the waiter surfaces as an `Interrupt` cause.
    pub async fn wait(&self, cx: &Cx) -> Result<A, Cause<E>> {
        match self.await_exit(cx).await {
            Ok(exit) => exit.into_result(),
            Err(interrupted) => Err(interrupted.into()),
        }
    }

    /// Suspends until the cell resolves, ignoring interrupts of the waiter.
    pub async fn join_exit(&self, cx: &Cx) -> Exit<A, E> {
        let mut waiter = DeferredWaiter::new(self);
        cx.suspend_uninterruptible("deferred join", |waker| waiter.poll(waker))
            .await
    }

    /// Blocks the calling OS thread until the cell resolves.
    ///
    /// Must not be called from a runtime worker thread.
    #[must_use]
    pub fn wait_blocking(&self) -> Exit<A, E> {
        let mut state = self.inner.state.lock();
        loop {
            if let Some(ref exit) = state.exit {
                return exit.clone();
            }
            self.inner.done.wait(&mut state);
        }
    }
}

fn run_observer<A, E>(observer: Observer<A, E>, exit: &Exit<A, E>) {
    if let Err(payload) =
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || observer(exit)))
    {
        tracing::warn!(
            message = %payload_to_string(payload.as_ref()),
            "completion observer panicked"
        );
    }
}

/// A registration in the cell's waiter set, removed on drop.
struct DeferredWaiter<'a, A, E> {
    deferred: &'a Deferred<A, E>,
    key: Option<u64>,
}

impl<'a, A, E> DeferredWaiter<'a, A, E>
where
    A: Clone,
    E: Clone,
{
    fn new(deferred: &'a Deferred<A, E>) -> Self {
        Self {
            deferred,
            key: None,
        }
    }

    fn poll(&mut self, waker: &Waker) -> Option<Exit<A, E>> {
        let mut state = self.deferred.inner.state.lock();
        if let Some(ref exit) = state.exit {
            return Some(exit.clone());
        }
        state.waiters.register(&mut self.key, waker);
        None
    }
}

impl<A, E> Drop for DeferredWaiter<'_, A, E> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.deferred.inner.state.lock().waiters.remove(key);
        }
    }
}
