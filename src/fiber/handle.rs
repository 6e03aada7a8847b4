//! Handles to running fibers.

use super::core::{FiberCore, FiberStatus};
use crate::cx::Cx;
use crate::sync::Deferred;
use crate::types::{Exit, FiberId, Interrupted};
use std::fmt;
use std::sync::Arc;

/// A handle to a fiber producing `Result<A, Cause<E>>`.
///
/// Handles are cheap to clone; every clone observes the same fiber. Two
/// handles compare equal when they refer to the same fiber.
pub struct Fiber<A, E> {
    core: Arc<FiberCore>,
    exit: Deferred<A, E>,
}

impl<A, E> Clone for Fiber<A, E> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            exit: self.exit.clone(),
        }
    }
}

impl<A, E> PartialEq for Fiber<A, E> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl<A, E> Eq for Fiber<A, E> {}

impl<A, E> fmt::Debug for Fiber<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", self.core.id())
            .field("status", &self.core.status())
            .finish()
    }
}

impl<A, E> Fiber<A, E>
where
    A: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub(crate) fn new(core: Arc<FiberCore>) -> Self {
        Self {
            core,
            exit: Deferred::new(),
        }
    }

    /// An already-finished fiber whose exit is an interruption by `by`.
    #[must_use]
    pub fn interrupted(by: FiberId) -> Self {
        let fiber = Self::new(Arc::new(FiberCore::done(FiberId::none())));
        fiber.exit.complete(Exit::interrupt(by));
        fiber
    }

    pub(crate) fn complete(&self, exit: Exit<A, E>) {
        self.exit.complete(exit);
    }

    /// The fiber's identity.
    #[must_use]
    pub fn id(&self) -> &FiberId {
        self.core.id()
    }

    /// The fiber's current status.
    #[must_use]
    pub fn status(&self) -> FiberStatus {
        self.core.status()
    }

    /// Returns true if both handles refer to the same fiber.
    #[must_use]
    pub fn same_fiber(&self, other: &Self) -> bool {
        self == other
    }

    /// The exit, if the fiber has finished and its observers have run.
    #[must_use]
    pub fn poll(&self) -> Option<Exit<A, E>> {
        self.exit.poll()
    }

    /// Returns true once [`poll`](Self::poll) would return `Some`.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.exit.is_done()
    }

    /// Waits for the fiber to finish.
    ///
    /// Neither interrupts the target nor observes interruption of the
    /// caller.
    pub async fn join(&self, cx: &Cx) -> Exit<A, E> {
        self.exit.join_exit(cx).await
    }

    /// Waits for the fiber to finish, returning early with the caller's
    /// interruption if the caller is interrupted. The target is left alone.
    pub async fn await_exit(&self, cx: &Cx) -> Result<Exit<A, E>, Interrupted> {
        self.exit.await_exit(cx).await
    }

    /// Interrupts the fiber on behalf of the caller and waits for it to
    /// finish.
    pub async fn interrupt(&self, cx: &Cx) -> Exit<A, E> {
        self.interrupt_as(cx, cx.id()).await
    }

    /// Interrupts the fiber on behalf of `by` and waits, uninterruptibly,
    /// for it to finish. On a finished fiber this just returns its exit.
    pub async fn interrupt_as(&self, cx: &Cx, by: &FiberId) -> Exit<A, E> {
        self.interrupt_fork(by);
        self.join(cx).await
    }

    /// Requests interruption on behalf of `by` without waiting.
    pub fn interrupt_fork(&self, by: &FiberId) {
        self.core.request_interrupt(by);
    }

    /// Runs `observer` with the exit once the fiber finishes, or
    /// immediately if it already has.
    pub fn add_observer<F>(&self, observer: F)
    where
        F: FnOnce(&Exit<A, E>) + Send + 'static,
    {
        self.exit.add_observer(observer);
    }

    /// Blocks the calling OS thread until the fiber finishes.
    ///
    /// Must not be called from a runtime worker thread.
    #[must_use]
    pub fn wait_blocking(&self) -> Exit<A, E> {
        self.exit.wait_blocking()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_test_logging, run_test};
    use crate::types::Cause;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn interrupted_fiber_is_done() {
        init_test("interrupted_fiber_is_done");
        let by = FiberId::make(4, 4);
        let fiber: Fiber<(), ()> = Fiber::interrupted(by.clone());
        assert!(fiber.is_done());
        assert_eq!(fiber.status(), FiberStatus::Done);
        assert_eq!(fiber.poll(), Some(Exit::interrupt(by)));
        crate::test_complete!("interrupted_fiber_is_done");
    }

    #[test]
    fn join_returns_success() {
        init_test("join_returns_success");
        run_test(|cx| async move {
            let child = cx.fork(|_| async { Ok::<_, Cause<String>>(21 * 2) });
            let exit = child.join(&cx).await;
            crate::assert_with_log!(
                exit == Exit::succeed(42),
                "child value",
                Exit::<i32, String>::succeed(42),
                exit
            );
            assert!(child.is_done());
            Ok(())
        });
        crate::test_complete!("join_returns_success");
    }

    #[test]
    fn panic_becomes_defect() {
        init_test("panic_becomes_defect");
        run_test(|cx| async move {
            let child = cx.fork(|_| async {
                if true {
                    panic!("kaboom");
                }
                Ok::<(), Cause<String>>(())
            });
            let exit = child.join(&cx).await;
            let cause = exit.cause().cloned().unwrap_or_default();
            let defects: Vec<String> = cause.defects().iter().map(|d| d.message().to_string()).collect();
            crate::assert_with_log!(
                defects == vec!["kaboom".to_string()],
                "panic payload captured",
                vec!["kaboom"],
                defects
            );
            Ok(())
        });
        crate::test_complete!("panic_becomes_defect");
    }

    #[test]
    fn interrupt_is_idempotent() {
        init_test("interrupt_is_idempotent");
        run_test(|cx| async move {
            let child = cx.fork(|cx| async move { cx.never::<()>().await.map_err(Cause::<String>::from) });
            let first = child.interrupt(&cx).await;
            let second = child.interrupt(&cx).await;
            assert!(first.is_interrupted_only());
            assert_eq!(first, second);
            Ok(())
        });
        crate::test_complete!("interrupt_is_idempotent");
    }

    #[test]
    fn interrupters_combine() {
        init_test("interrupters_combine");
        run_test(|cx| async move {
            let entered = Deferred::<(), String>::new();
            let gate = Deferred::<(), String>::new();
            let (signal, release) = (entered.clone(), gate.clone());
            let child = cx.fork(move |cx| async move {
                cx.uninterruptible(|cx| async move {
                    signal.succeed(());
                    release.join_exit(&cx).await;
                })
                .await;
                cx.checkpoint()?;
                Ok::<(), Cause<String>>(())
            });
            entered.join_exit(&cx).await;
            let a = FiberId::make(1000, 1000);
            let b = FiberId::make(2000, 2000);
            child.interrupt_fork(&a);
            child.interrupt_fork(&b);
            gate.succeed(());
            let exit = child.join(&cx).await;
            assert_eq!(exit, Exit::interrupt(a.combine(&b)));
            Ok(())
        });
        crate::test_complete!("interrupters_combine");
    }

    #[test]
    fn observers_fire_once_in_order() {
        init_test("observers_fire_once_in_order");
        run_test(|cx| async move {
            let gate = Deferred::<(), String>::new();
            let open = gate.clone();
            let child = cx.fork(move |cx| async move { open.wait(&cx).await });
            let calls = Arc::new(parking_lot::Mutex::new(Vec::new()));
            for i in 0..3 {
                let calls = Arc::clone(&calls);
                child.add_observer(move |exit| {
                    assert!(exit.is_success());
                    calls.lock().push(i);
                });
            }
            gate.succeed(());
            let _ = child.join(&cx).await;
            assert_eq!(*calls.lock(), vec![0, 1, 2]);
            Ok(())
        });
        crate::test_complete!("observers_fire_once_in_order");
    }

    #[test]
    fn await_exit_is_interruptible() {
        init_test("await_exit_is_interruptible");
        let joins = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&joins);
        run_test(move |cx| async move {
            let target = cx.fork_daemon(|cx| async move {
                cx.sleep(Duration::from_millis(200)).await?;
                Ok::<_, Cause<String>>(())
            });
            let waiting_target = target.clone();
            let waiter = cx.fork(move |cx| async move {
                let outcome = waiting_target.await_exit(&cx).await;
                seen.fetch_add(1, Ordering::SeqCst);
                outcome.map(|_| ()).map_err(Cause::<String>::from)
            });
            cx.sleep(Duration::from_millis(10)).await?;
            let exit = waiter.interrupt(&cx).await;
            assert!(exit.is_interrupted_only());
            assert!(!target.is_done());
            let target_exit = target.join(&cx).await;
            assert!(target_exit.is_success());
            Ok(())
        });
        assert_eq!(joins.load(Ordering::SeqCst), 1);
        crate::test_complete!("await_exit_is_interruptible");
    }
}
