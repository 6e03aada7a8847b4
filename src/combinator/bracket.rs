//! Bracket combinators for resource safety.
//!
//! The bracket pattern ensures that resources are always released, even when
//! the body fails, panics or is interrupted. It follows the
//! acquire/use/release pattern familiar from RAII and try-finally, with
//! interruption handled explicitly:
//!
//! - `acquire` runs uninterruptibly; an interrupt arriving meanwhile is
//!   deferred until the resource is held
//! - `use` runs with the caller's own interruptibility
//! - `release` always runs, uninterruptibly, and sees how `use` ended
//!
//! Release failures never mask the body's failure: they are appended to it
//! as a sequential cause.

use crate::cx::Cx;
use crate::fiber::catch_cause;
use crate::types::{Cause, Exit, FiberId};
use std::future::Future;

/// Acquires a resource, uses it, and guarantees release.
///
/// If `acquire` fails, `release` does not run and the failure is returned.
/// Otherwise the result is the exit of `use_fn` with any failure of
/// `release` appended after it.
///
/// # Example
/// ```ignore
/// let lines = acquire_release(
///     &cx,
///     |cx| async move { open(&cx, "data.txt").await },
///     |cx, file| async move { file.read_lines(&cx).await },
///     |cx, file, _exit| async move { file.close(&cx).await },
/// )
/// .await?;
/// ```
pub async fn acquire_release<R, A, E, Acq, AcqFut, Use, UseFut, Rel, RelFut>(
    cx: &Cx,
    acquire: Acq,
    use_fn: Use,
    release: Rel,
) -> Result<A, Cause<E>>
where
    R: Clone,
    A: Clone,
    E: Clone,
    Acq: FnOnce(Cx) -> AcqFut,
    AcqFut: Future<Output = Result<R, Cause<E>>>,
    Use: FnOnce(Cx, R) -> UseFut,
    UseFut: Future<Output = Result<A, Cause<E>>>,
    Rel: FnOnce(Cx, R, Exit<A, E>) -> RelFut,
    RelFut: Future<Output = Result<(), Cause<E>>>,
{
    cx.uninterruptible_mask(|cx, restore| async move {
        let resource = catch_cause(acquire(cx.clone())).await?;

        let held = resource.clone();
        let use_exit: Exit<A, E> = catch_cause(restore.apply(&cx, |cx| async move {
            cx.checkpoint()?;
            use_fn(cx, held).await
        }))
        .await
        .into();

        let release_cause = match catch_cause(release(cx.clone(), resource, use_exit.clone())).await
        {
            Ok(()) => Cause::empty(),
            Err(cause) => {
                tracing::debug!(fiber_id = %cx.id(), "release failed");
                cause
            }
        };
        use_exit.append_cause(release_cause).into_result()
    })
    .await
}

/// Runs `finalizer` after `effect`, however `effect` ends.
pub async fn ensuring<A, E, F, Fut, Fin, FinFut>(
    cx: &Cx,
    effect: F,
    finalizer: Fin,
) -> Result<A, Cause<E>>
where
    A: Clone,
    E: Clone,
    F: FnOnce(Cx) -> Fut,
    Fut: Future<Output = Result<A, Cause<E>>>,
    Fin: FnOnce(Cx) -> FinFut,
    FinFut: Future<Output = Result<(), Cause<E>>>,
{
    acquire_release(
        cx,
        |_| async { Ok(()) },
        |cx, ()| effect(cx),
        |cx, (), _| finalizer(cx),
    )
    .await
}

/// Runs `cleanup` with the exit of `effect`, however it ends.
pub async fn on_exit<A, E, F, Fut, C, CFut>(cx: &Cx, effect: F, cleanup: C) -> Result<A, Cause<E>>
where
    A: Clone,
    E: Clone,
    F: FnOnce(Cx) -> Fut,
    Fut: Future<Output = Result<A, Cause<E>>>,
    C: FnOnce(Cx, Exit<A, E>) -> CFut,
    CFut: Future<Output = Result<(), Cause<E>>>,
{
    acquire_release(
        cx,
        |_| async { Ok(()) },
        |cx, ()| effect(cx),
        |cx, (), exit| cleanup(cx, exit),
    )
    .await
}

/// Runs `cleanup` only if `effect` ends interrupted, passing the combined
/// identity of the interrupters.
pub async fn on_interrupt<A, E, F, Fut, C, CFut>(
    cx: &Cx,
    effect: F,
    cleanup: C,
) -> Result<A, Cause<E>>
where
    A: Clone,
    E: Clone,
    F: FnOnce(Cx) -> Fut,
    Fut: Future<Output = Result<A, Cause<E>>>,
    C: FnOnce(Cx, FiberId) -> CFut,
    CFut: Future<Output = Result<(), Cause<E>>>,
{
    on_exit(cx, effect, |cx, exit: Exit<A, E>| async move {
        match exit.cause() {
            Some(cause) if cause.is_interrupted() => cleanup(cx, cause.interruptors()).await,
            _ => Ok(()),
        }
    })
    .await
}
