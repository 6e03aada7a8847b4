//! Resource scopes.
//!
//! A [`Scope`] collects finalizers and runs them, last registered first,
//! when it is closed. Each finalizer receives the exit that closed the
//! scope. Finalizers run uninterruptibly, a panicking finalizer becomes a
//! `Die` cause, and failures are composed sequentially in the order the
//! finalizers ran.
//!
//! [`scoped`] ties a scope's lifetime to a computation: the scope is opened
//! before the body runs and closed with the body's exit, whatever it is.

use crate::combinator::acquire_release;
use crate::cx::Cx;
use crate::fiber::catch_cause;
use crate::types::{Cause, Exit};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type FinalizerFuture<E> = Pin<Box<dyn Future<Output = Result<(), Cause<E>>> + Send + 'static>>;
type Finalizer<E> = Box<dyn FnOnce(Cx, Exit<(), E>) -> FinalizerFuture<E> + Send + 'static>;

enum ScopeState<E> {
    Open(Vec<Finalizer<E>>),
    Closed(Exit<(), E>),
}

/// A set of finalizers released together.
pub struct Scope<E> {
    state: Arc<Mutex<ScopeState<E>>>,
}

impl<E> Clone for Scope<E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<E> fmt::Debug for Scope<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (closed, finalizers) = match &*self.state.lock() {
            ScopeState::Open(finalizers) => (false, finalizers.len()),
            ScopeState::Closed(_) => (true, 0),
        };
        f.debug_struct("Scope")
            .field("closed", &closed)
            .field("finalizers", &finalizers)
            .finish()
    }
}

impl<E> Default for Scope<E>
where
    E: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Scope<E>
where
    E: Clone + Send + 'static,
{
    /// Creates an open scope.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ScopeState::Open(Vec::new()))),
        }
    }

    /// Returns true once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(&*self.state.lock(), ScopeState::Closed(_))
    }

    /// Registers a finalizer.
    ///
    /// On a closed scope the finalizer runs right away, uninterruptibly,
    /// with the exit that closed the scope, and its outcome is returned.
    pub async fn add_finalizer<F, Fut>(&self, cx: &Cx, finalizer: F) -> Result<(), Cause<E>>
    where
        F: FnOnce(Cx, Exit<(), E>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Cause<E>>> + Send + 'static,
    {
        let closed_with = {
            let mut state = self.state.lock();
            match &mut *state {
                ScopeState::Open(finalizers) => {
                    finalizers.push(Box::new(move |cx, exit| Box::pin(finalizer(cx, exit))));
                    return Ok(());
                }
                ScopeState::Closed(exit) => exit.clone(),
            }
        };
        cx.uninterruptible(|cx| catch_cause(finalizer(cx, closed_with)))
            .await
    }

    /// Closes the scope, running every finalizer in reverse registration
    /// order. Closing an already-closed scope does nothing.
    pub async fn close(&self, cx: &Cx, exit: Exit<(), E>) -> Result<(), Cause<E>> {
        let finalizers = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, ScopeState::Closed(exit.clone())) {
                ScopeState::Open(finalizers) => finalizers,
                closed @ ScopeState::Closed(_) => {
                    *state = closed;
                    return Ok(());
                }
            }
        };
        tracing::debug!(
            fiber_id = %cx.id(),
            finalizers = finalizers.len(),
            success = exit.is_success(),
            "closing scope"
        );

        let cause = cx
            .uninterruptible(|cx| async move {
                let mut cause = Cause::empty();
                for finalizer in finalizers.into_iter().rev() {
                    if let Err(c) = catch_cause(finalizer(cx.clone(), exit.clone())).await {
                        cause = cause.then(c);
                    }
                }
                cause
            })
            .await;

        if cause.is_empty() {
            Ok(())
        } else {
            Err(cause)
        }
    }

    /// Acquires a resource now and registers its release on this scope.
    ///
    /// Acquisition is uninterruptible. If it fails, nothing is registered.
    pub async fn acquire_release<R, Acq, AcqFut, Rel, RelFut>(
        &self,
        cx: &Cx,
        acquire: Acq,
        release: Rel,
    ) -> Result<R, Cause<E>>
    where
        R: Clone + Send + 'static,
        Acq: FnOnce(Cx) -> AcqFut,
        AcqFut: Future<Output = Result<R, Cause<E>>>,
        Rel: FnOnce(Cx, R, Exit<(), E>) -> RelFut + Send + 'static,
        RelFut: Future<Output = Result<(), Cause<E>>> + Send + 'static,
    {
        cx.uninterruptible(|cx| async move {
            let resource = catch_cause(acquire(cx.clone())).await?;
            let held = resource.clone();
            self.add_finalizer(&cx, move |cx, exit| release(cx, held, exit))
                .await?;
            Ok(resource)
        })
        .await
    }
}

/// Runs `body` with a fresh scope, closing it with the body's exit.
///
/// Finalizer failures are appended after the body's own failure.
pub async fn scoped<A, E, F, Fut>(cx: &Cx, body: F) -> Result<A, Cause<E>>
where
    A: Clone + Send + 'static,
    E: Clone + Send + 'static,
    F: FnOnce(Cx, Scope<E>) -> Fut,
    Fut: Future<Output = Result<A, Cause<E>>>,
{
    acquire_release(
        cx,
        |_| async { Ok(Scope::new()) },
        body,
        |cx, scope: Scope<E>, exit: Exit<A, E>| async move {
            scope.close(&cx, exit.as_unit()).await
        },
    )
    .await
}
