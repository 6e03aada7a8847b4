//! Detaching cleanup from the caller.
//!
//! [`disconnect`] runs an effect on a background fiber so that interrupting
//! the caller returns immediately, while the effect's own finalizers keep
//! running to completion in the background.

use crate::cx::Cx;
use crate::types::Cause;
use std::future::Future;

/// Runs `effect` on a daemon fiber and waits for it interruptibly.
///
/// The background fiber runs `effect` under the caller's interruptibility,
/// so disconnecting inside an uninterruptible region keeps the effect
/// uninterruptible. If the caller is interrupted while waiting, the background fiber is
/// asked to stop (on behalf of the caller) and the caller's interruption is
/// returned without waiting for the background fiber to finish unwinding.
pub async fn disconnect<A, E, F, Fut>(cx: &Cx, effect: F) -> Result<A, Cause<E>>
where
    A: Clone + Send + 'static,
    E: Clone + Send + 'static,
    F: FnOnce(Cx) -> Fut + Send + 'static,
    Fut: Future<Output = Result<A, Cause<E>>> + Send + 'static,
{
    let interruptible = cx.is_interruptible();
    let background = cx.fork_daemon(move |cx| async move {
        if interruptible {
            effect(cx).await
        } else {
            cx.uninterruptible(effect).await
        }
    });
    match background.await_exit(cx).await {
        Ok(exit) => exit.into_result(),
        Err(interrupted) => {
            tracing::debug!(
                fiber_id = %cx.id(),
                background = %background.id(),
                "disconnected effect interrupted, cleanup continues in background"
            );
            background.interrupt_fork(cx.id());
            Err(interrupted.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_test_logging, run_test};

    #[test]
    fn passes_through_result() {
        init_test_logging();
        crate::test_phase!("passes_through_result");
        run_test(|cx| async move {
            let ok = disconnect(&cx, |_| async { Ok::<_, Cause<String>>(5) }).await;
            assert_eq!(ok, Ok(5));
            let err: Result<(), Cause<String>> =
                disconnect(&cx, |_| async { Err(Cause::fail("bg".to_string())) }).await;
            assert_eq!(err, Err(Cause::fail("bg".to_string())));
            Ok(())
        });
        crate::test_complete!("passes_through_result");
    }

    #[test]
    fn effect_inherits_interruptibility() {
        init_test_logging();
        crate::test_phase!("effect_inherits_interruptibility");
        run_test(|cx| async move {
            let masked = cx
                .uninterruptible(|cx| async move {
                    disconnect(&cx, |cx| async move {
                        Ok::<_, Cause<String>>(cx.is_interruptible())
                    })
                    .await
                })
                .await;
            assert_eq!(masked, Ok(false));

            let open = disconnect(&cx, |cx| async move {
                Ok::<_, Cause<String>>(cx.is_interruptible())
            })
            .await;
            assert_eq!(open, Ok(true));
            Ok(())
        });
        crate::test_complete!("effect_inherits_interruptibility");
    }
}
