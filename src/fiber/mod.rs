//! Fibers: identity, lifecycle and the task that drives a fiber body.
//!
//! A fiber body is a future built from a [`Cx`]. [`spawn`] allocates the
//! fiber's identity, wraps the body so that panics become defects and a
//! delivered interrupt is reflected in the exit, and hands the result to
//! the scheduler as a [`FiberTask`].

pub(crate) mod core;
mod handle;

pub use self::core::FiberStatus;
pub use handle::Fiber;

use self::core::FiberCore;
use crate::cx::Cx;
use crate::runtime::builder::RuntimeShared;
use crate::runtime::task::FiberTask;
use crate::types::{Cause, Defect, Exit, FiberId};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Forks a fiber running `f` on `runtime`.
///
/// With a `parent`, the new fiber is supervised: it is interrupted when the
/// parent's body finishes.
pub(crate) fn spawn<A, E, F, Fut>(
    runtime: &Arc<RuntimeShared>,
    parent: Option<&Arc<FiberCore>>,
    f: F,
) -> Fiber<A, E>
where
    F: FnOnce(Cx) -> Fut + Send + 'static,
    Fut: Future<Output = Result<A, Cause<E>>> + Send + 'static,
    A: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    let id = runtime.next_fiber_id();
    let core = Arc::new(FiberCore::new(id.clone()));
    let fiber = Fiber::new(Arc::clone(&core));
    if let Some(parent) = parent {
        parent.adopt_child(Arc::clone(&core));
    }
    tracing::trace!(
        fiber_id = %id,
        parent = %parent.map_or_else(String::new, |p| p.id().to_string()),
        "fiber forked"
    );

    let cx = Cx::new(core, Arc::clone(runtime));
    let body = run_fiber(cx, fiber.clone(), f);
    FiberTask::spawn(id, Arc::clone(&runtime.scheduler), Box::pin(body));
    fiber
}

async fn run_fiber<A, E, F, Fut>(cx: Cx, fiber: Fiber<A, E>, f: F)
where
    F: FnOnce(Cx) -> Fut + Send + 'static,
    Fut: Future<Output = Result<A, Cause<E>>> + Send + 'static,
    A: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    let body_cx = cx.clone();
    let result = catch_cause(async move {
        // An interrupt requested before the first poll wins over the body.
        body_cx.checkpoint()?;
        f(body_cx).await
    })
    .await;

    let core = cx.core();
    let exit = settle(Exit::from(result), core.delivered_interrupt());

    let children = core.finish();
    for child in &children {
        child.request_interrupt(core.id());
    }
    tracing::trace!(
        fiber_id = %core.id(),
        success = exit.is_success(),
        interrupted = exit.is_interrupted(),
        orphans = children.len(),
        "fiber done"
    );
    fiber.complete(exit);
}

/// Reconciles the body's result with an interrupt delivered while it ran.
fn settle<A, E>(exit: Exit<A, E>, delivered: Option<FiberId>) -> Exit<A, E> {
    let Some(by) = delivered else {
        return exit;
    };
    match exit {
        Exit::Success(_) => Exit::interrupt(by),
        Exit::Failure(cause) if cause.is_interrupted() => Exit::Failure(cause),
        Exit::Failure(cause) => Exit::Failure(Cause::interrupt(by).then(cause)),
    }
}

/// Polls the inner future, turning a panic into `Err(payload)`.
pub(crate) struct CatchUnwind<F>(Pin<Box<F>>);

impl<F: Future> CatchUnwind<F> {
    pub(crate) fn new(future: F) -> Self {
        Self(Box::pin(future))
    }
}

impl<F: Future> Future for CatchUnwind<F> {
    type Output = std::thread::Result<F::Output>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = self.0.as_mut();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| inner.poll(cx)));
        match result {
            Ok(Poll::Pending) => Poll::Pending,
            Ok(Poll::Ready(v)) => Poll::Ready(Ok(v)),
            Err(payload) => Poll::Ready(Err(payload)),
        }
    }
}

/// Awaits `future`, converting a panic into a `Die` cause.
pub(crate) async fn catch_cause<T, E, Fut>(future: Fut) -> Result<T, Cause<E>>
where
    Fut: Future<Output = Result<T, Cause<E>>>,
{
    match CatchUnwind::new(future).await {
        Ok(result) => result,
        Err(payload) => Err(Cause::die(Defect::from_panic(payload.as_ref()))),
    }
}
