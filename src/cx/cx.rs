//! The fiber context type.
//!
//! `Cx` is the handle a fiber body receives. It grants access to:
//! - the fiber's identity
//! - interruption checks and interruptibility regions
//! - suspension primitives (yielding, sleeping, parking forever)
//! - forking child and daemon fibers onto the same runtime
//!
//! # Interruptibility
//!
//! Every fiber owns a stack of interruptibility regions, starting
//! `[interruptible]`. A pending interrupt is only delivered at a suspension
//! point or a [`Cx::checkpoint`] while the innermost region is
//! interruptible. Regions are restored when their future completes or is
//! dropped, so an early return or a panic cannot leak a mask.
//!
//! ```ignore
//! let resource = cx
//!     .uninterruptible_mask(|cx, restore| async move {
//!         let conn = open(&cx).await?;          // interrupts deferred
//!         restore.apply(&cx, |cx| use_conn(cx, conn)).await
//!     })
//!     .await;
//! ```

use crate::fiber::core::{FiberCore, FiberStatus};
use crate::fiber::{spawn, Fiber};
use crate::runtime::builder::RuntimeShared;
use crate::types::{Cause, FiberId, Interrupted};
use std::fmt;
use std::future::{poll_fn, Future};
use std::sync::Arc;
use std::task::{Poll, Waker};
use std::time::{Duration, Instant};

/// The context of a running fiber.
#[derive(Clone)]
pub struct Cx {
    core: Arc<FiberCore>,
    runtime: Arc<RuntimeShared>,
}

impl fmt::Debug for Cx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cx")
            .field("fiber_id", self.core.id())
            .field("status", &self.core.status())
            .finish_non_exhaustive()
    }
}

impl Cx {
    pub(crate) fn new(core: Arc<FiberCore>, runtime: Arc<RuntimeShared>) -> Self {
        Self { core, runtime }
    }

    pub(crate) fn core(&self) -> &Arc<FiberCore> {
        &self.core
    }

    /// Returns the identity of the current fiber.
    #[must_use]
    pub fn id(&self) -> &FiberId {
        self.core.id()
    }

    /// Returns the current fiber's status.
    #[must_use]
    pub fn status(&self) -> FiberStatus {
        self.core.status()
    }

    /// Returns true if the innermost region is interruptible.
    #[must_use]
    pub fn is_interruptible(&self) -> bool {
        self.core.is_interruptible()
    }

    /// Checks for a deliverable interrupt.
    ///
    /// Returns `Err` if an interrupt is pending and the current region is
    /// interruptible. Use with `?` between discrete steps of long
    /// computations that would otherwise not reach a suspension point.
    pub fn checkpoint(&self) -> Result<(), Interrupted> {
        self.core.take_interrupt().map_or(Ok(()), Err)
    }

    /// Gives other fibers a chance to run.
    pub async fn yield_now(&self) -> Result<(), Interrupted> {
        let mut yielded = false;
        self.suspend("yield", |waker| {
            if yielded {
                Some(())
            } else {
                yielded = true;
                waker.wake_by_ref();
                None
            }
        })
        .await
    }

    /// Suspends the fiber for at least `duration`.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        let deadline = Instant::now() + duration;
        let timer = &self.runtime.timer;
        let mut registered = false;
        self.suspend("sleep", |waker| {
            if Instant::now() >= deadline {
                return Some(());
            }
            if !registered {
                timer.register(deadline, waker.clone());
                registered = true;
            }
            None
        })
        .await
    }

    /// Suspends forever. Only an interrupt resumes the fiber, so in an
    /// uninterruptible region this never returns.
    pub async fn never<A>(&self) -> Result<A, Interrupted> {
        self.suspend("never", |_| None).await
    }

    /// Runs `f` with interrupts deferred until it completes.
    pub async fn uninterruptible<T, F, Fut>(&self, f: F) -> T
    where
        F: FnOnce(Self) -> Fut,
        Fut: Future<Output = T>,
    {
        let _region = RegionGuard::enter(&self.core, false);
        f(self.clone()).await
    }

    /// Runs `f` in an interruptible region, even inside an uninterruptible
    /// one.
    pub async fn interruptible<T, F, Fut>(&self, f: F) -> T
    where
        F: FnOnce(Self) -> Fut,
        Fut: Future<Output = T>,
    {
        let _region = RegionGuard::enter(&self.core, true);
        f(self.clone()).await
    }

    /// Runs `f` uninterruptibly, handing it a [`Restore`] token that
    /// re-applies the interruptibility in effect before the mask.
    pub async fn uninterruptible_mask<T, F, Fut>(&self, f: F) -> T
    where
        F: FnOnce(Self, Restore) -> Fut,
        Fut: Future<Output = T>,
    {
        let restore = Restore {
            interruptible: self.is_interruptible(),
        };
        let _region = RegionGuard::enter(&self.core, false);
        f(self.clone(), restore).await
    }

    /// Forks a child fiber.
    ///
    /// The child starts asynchronously. When the current fiber's body
    /// finishes, the child is interrupted if it is still running.
    pub fn fork<A, E, F, Fut>(&self, f: F) -> Fiber<A, E>
    where
        F: FnOnce(Self) -> Fut + Send + 'static,
        Fut: Future<Output = Result<A, Cause<E>>> + Send + 'static,
        A: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        spawn(&self.runtime, Some(&self.core), f)
    }

    /// Forks a fiber that is not supervised by the current one.
    pub fn fork_daemon<A, E, F, Fut>(&self, f: F) -> Fiber<A, E>
    where
        F: FnOnce(Self) -> Fut + Send + 'static,
        Fut: Future<Output = Result<A, Cause<E>>> + Send + 'static,
        A: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        spawn(&self.runtime, None, f)
    }

    /// Interruptible suspension point.
    ///
    /// `ready` is polled with the task's waker; it returns `Some` once the
    /// awaited condition holds, otherwise arranges for the waker to fire and
    /// returns `None`. A deliverable interrupt wins over an unresolved
    /// condition.
    pub(crate) async fn suspend<T, P>(
        &self,
        blocking_on: &'static str,
        mut ready: P,
    ) -> Result<T, Interrupted>
    where
        P: FnMut(&Waker) -> Option<T>,
    {
        let mut guard = SuspendGuard::new(&self.core);
        poll_fn(|task_cx| {
            if let Some(interrupted) = self.core.take_interrupt() {
                return Poll::Ready(Err(interrupted));
            }
            if let Some(value) = ready(task_cx.waker()) {
                return Poll::Ready(Ok(value));
            }
            match self
                .core
                .park(&mut guard.slot, task_cx.waker(), blocking_on, true)
            {
                Some(interrupted) => Poll::Ready(Err(interrupted)),
                None => Poll::Pending,
            }
        })
        .await
    }

    /// Suspension point that ignores interrupts.
    pub(crate) async fn suspend_uninterruptible<T, P>(
        &self,
        blocking_on: &'static str,
        mut ready: P,
    ) -> T
    where
        P: FnMut(&Waker) -> Option<T>,
    {
        let mut guard = SuspendGuard::new(&self.core);
        poll_fn(|task_cx| {
            if let Some(value) = ready(task_cx.waker()) {
                return Poll::Ready(value);
            }
            let _ = self
                .core
                .park(&mut guard.slot, task_cx.waker(), blocking_on, false);
            Poll::Pending
        })
        .await
    }
}

/// Re-applies the interruptibility captured by
/// [`Cx::uninterruptible_mask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Restore {
    interruptible: bool,
}

impl Restore {
    /// Whether the restored region is interruptible.
    #[must_use]
    pub const fn is_interruptible(&self) -> bool {
        self.interruptible
    }

    /// Runs `f` under the captured interruptibility.
    pub async fn apply<T, F, Fut>(self, cx: &Cx, f: F) -> T
    where
        F: FnOnce(Cx) -> Fut,
        Fut: Future<Output = T>,
    {
        let _region = RegionGuard::enter(&cx.core, self.interruptible);
        f(cx.clone()).await
    }
}

/// Pops an interruptibility region on drop.
struct RegionGuard {
    core: Arc<FiberCore>,
    depth: usize,
}

impl RegionGuard {
    fn enter(core: &Arc<FiberCore>, interruptible: bool) -> Self {
        let depth = core.push_region(interruptible);
        Self {
            core: Arc::clone(core),
            depth,
        }
    }
}

impl Drop for RegionGuard {
    fn drop(&mut self) {
        self.core.truncate_regions(self.depth);
    }
}

/// Clears the suspended status and the interrupt waker on drop.
struct SuspendGuard<'a> {
    core: &'a FiberCore,
    slot: Option<u64>,
}

impl<'a> SuspendGuard<'a> {
    fn new(core: &'a FiberCore) -> Self {
        Self { core, slot: None }
    }
}

impl Drop for SuspendGuard<'_> {
    fn drop(&mut self) {
        self.core.resume(self.slot.take());
    }
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{init_test_logging, run_test};
    use crate::types::{Cause, Exit};
    use std::time::Duration;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn regions_nest_and_restore() {
        init_test("regions_nest_and_restore");
        run_test(|cx| async move {
            assert!(cx.is_interruptible());
            cx.uninterruptible(|cx| async move {
                assert!(!cx.is_interruptible());
                cx.interruptible(|cx| async move {
                    assert!(cx.is_interruptible());
                })
                .await;
                assert!(!cx.is_interruptible());
            })
            .await;
            assert!(cx.is_interruptible());
            Ok(())
        });
        crate::test_complete!("regions_nest_and_restore");
    }

    #[test]
    fn restore_reapplies_outer_region() {
        init_test("restore_reapplies_outer_region");
        run_test(|cx| async move {
            cx.uninterruptible_mask(|cx, restore| async move {
                assert!(restore.is_interruptible());
                assert!(!cx.is_interruptible());
                restore
                    .apply(&cx, |cx| async move { assert!(cx.is_interruptible()) })
                    .await;
                cx.uninterruptible_mask(|cx, inner| async move {
                    assert!(!inner.is_interruptible());
                    inner
                        .apply(&cx, |cx| async move { assert!(!cx.is_interruptible()) })
                        .await;
                })
                .await;
            })
            .await;
            Ok(())
        });
        crate::test_complete!("restore_reapplies_outer_region");
    }

    #[test]
    fn sleep_elapses() {
        init_test("sleep_elapses");
        run_test(|cx| async move {
            let start = std::time::Instant::now();
            cx.sleep(Duration::from_millis(20)).await?;
            crate::assert_with_log!(
                start.elapsed() >= Duration::from_millis(20),
                "slept at least the requested duration",
                ">= 20ms",
                start.elapsed()
            );
            Ok(())
        });
        crate::test_complete!("sleep_elapses");
    }

    #[test]
    fn interrupt_wakes_sleeper() {
        init_test("interrupt_wakes_sleeper");
        run_test(|cx| async move {
            let sleeper = cx.fork(|cx| async move {
                cx.sleep(Duration::from_secs(3600)).await?;
                Ok::<_, Cause<String>>(())
            });
            cx.yield_now().await?;
            let exit = sleeper.interrupt(&cx).await;
            crate::assert_with_log!(
                exit == Exit::interrupt(cx.id().clone()),
                "sleeper exits interrupted by the caller",
                Exit::<(), String>::interrupt(cx.id().clone()),
                exit
            );
            Ok(())
        });
        crate::test_complete!("interrupt_wakes_sleeper");
    }

    #[test]
    fn checkpoint_respects_mask() {
        init_test("checkpoint_respects_mask");
        run_test(|cx| async move {
            let entered = crate::sync::Deferred::<(), String>::new();
            let gate = crate::sync::Deferred::<(), String>::new();
            let (signal, release) = (entered.clone(), gate.clone());
            let worker = cx.fork(move |cx| async move {
                cx.uninterruptible(|cx| async move {
                    signal.succeed(());
                    release.join_exit(&cx).await;
                    assert!(cx.checkpoint().is_ok());
                })
                .await;
                cx.checkpoint()?;
                Ok::<_, Cause<String>>(())
            });
            entered.join_exit(&cx).await;
            worker.interrupt_fork(cx.id());
            gate.succeed(());
            let exit = worker.join(&cx).await;
            assert!(exit.is_interrupted_only());
            Ok(())
        });
        crate::test_complete!("checkpoint_respects_mask");
    }
}
