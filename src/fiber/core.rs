//! Per-fiber shared state.
//!
//! A [`FiberCore`] is shared between the fiber's own task (through its
//! [`Cx`](crate::cx::Cx)), every [`Fiber`](super::Fiber) handle, and the
//! parent that supervises it. One mutex guards the status, the pending
//! interrupters, the interruptibility stack and the wakers of an
//! interruptible suspension, so "is an interrupt deliverable" and "park
//! here" are decided atomically.

use crate::sync::waiters::WaiterSet;
use crate::types::{FiberId, Interrupted};
use parking_lot::Mutex;
use std::sync::Arc;
use std::task::Waker;

/// Observable lifecycle state of a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberStatus {
    /// Executing, or queued to execute.
    Running,
    /// Parked at a suspension point.
    Suspended {
        /// What the fiber is waiting on.
        blocking_on: &'static str,
    },
    /// An interrupt has been delivered and the fiber is unwinding.
    Interrupting,
    /// Terminal.
    Done,
}

impl FiberStatus {
    /// Returns true for [`FiberStatus::Done`].
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

#[derive(Debug)]
struct CoreState {
    status: FiberStatus,
    interrupters: Option<FiberId>,
    interrupt_delivered: bool,
    /// Interruptibility regions, innermost last.
    regions: Vec<bool>,
    interrupt_wakers: WaiterSet,
    children: Vec<Arc<FiberCore>>,
}

#[derive(Debug)]
pub(crate) struct FiberCore {
    id: FiberId,
    state: Mutex<CoreState>,
}

impl FiberCore {
    pub(crate) fn new(id: FiberId) -> Self {
        Self {
            id,
            state: Mutex::new(CoreState {
                status: FiberStatus::Running,
                interrupters: None,
                interrupt_delivered: false,
                regions: vec![true],
                interrupt_wakers: WaiterSet::new(),
                children: Vec::new(),
            }),
        }
    }

    /// A core that never ran.
    pub(crate) fn done(id: FiberId) -> Self {
        let core = Self::new(id);
        core.state.lock().status = FiberStatus::Done;
        core
    }

    pub(crate) fn id(&self) -> &FiberId {
        &self.id
    }

    pub(crate) fn status(&self) -> FiberStatus {
        self.state.lock().status
    }

    pub(crate) fn is_interruptible(&self) -> bool {
        self.state.lock().regions.last().copied().unwrap_or(true)
    }

    /// Pushes a region and returns the depth to truncate back to.
    pub(crate) fn push_region(&self, interruptible: bool) -> usize {
        let mut state = self.state.lock();
        let depth = state.regions.len();
        state.regions.push(interruptible);
        depth
    }

    pub(crate) fn truncate_regions(&self, depth: usize) {
        self.state.lock().regions.truncate(depth.max(1));
    }

    /// Records `by` as an interrupter and wakes the fiber if it is parked at
    /// an interruptible suspension point. No-op once the fiber is done.
    pub(crate) fn request_interrupt(&self, by: &FiberId) {
        let wakers = {
            let mut state = self.state.lock();
            if state.status.is_done() {
                return;
            }
            let combined = match state.interrupters.take() {
                Some(existing) => existing.combine(by),
                None => by.clone(),
            };
            state.interrupters = Some(combined);
            state.interrupt_wakers.take_all()
        };
        tracing::debug!(fiber_id = %self.id, by = %by, "interrupt requested");
        for waker in wakers {
            waker.wake();
        }
    }

    /// Delivers a pending interrupt if the innermost region is interruptible.
    pub(crate) fn take_interrupt(&self) -> Option<Interrupted> {
        let mut state = self.state.lock();
        Self::deliver_locked(&self.id, &mut state)
    }

    fn deliver_locked(id: &FiberId, state: &mut CoreState) -> Option<Interrupted> {
        if !state.regions.last().copied().unwrap_or(true) {
            return None;
        }
        let by = state.interrupters.clone()?;
        if !state.interrupt_delivered {
            tracing::debug!(fiber_id = %id, by = %by, "interrupt delivered");
        }
        state.interrupt_delivered = true;
        state.status = FiberStatus::Interrupting;
        Some(Interrupted::new(by))
    }

    /// Marks the fiber suspended on `blocking_on`.
    ///
    /// At an interruptible point the pending interrupt is re-checked under
    /// the same lock that registers the interrupt waker, so a request racing
    /// with the park is never lost.
    pub(crate) fn park(
        &self,
        slot: &mut Option<u64>,
        waker: &Waker,
        blocking_on: &'static str,
        interruptible_point: bool,
    ) -> Option<Interrupted> {
        let mut state = self.state.lock();
        if interruptible_point {
            if let Some(interrupted) = Self::deliver_locked(&self.id, &mut state) {
                return Some(interrupted);
            }
            if state.regions.last().copied().unwrap_or(true) {
                state.interrupt_wakers.register(slot, waker);
            }
        }
        if state.status == FiberStatus::Running {
            tracing::trace!(fiber_id = %self.id, blocking_on, "fiber suspended");
            state.status = FiberStatus::Suspended { blocking_on };
        }
        None
    }

    /// Undoes [`park`](Self::park) once the suspension point resolves.
    pub(crate) fn resume(&self, slot: Option<u64>) {
        let mut state = self.state.lock();
        if let Some(key) = slot {
            state.interrupt_wakers.remove(key);
        }
        if matches!(state.status, FiberStatus::Suspended { .. }) {
            state.status = FiberStatus::Running;
        }
    }

    pub(crate) fn adopt_child(&self, child: Arc<Self>) {
        let mut state = self.state.lock();
        state.children.retain(|c| !c.status().is_done());
        state.children.push(child);
    }

    /// Returns the interrupters if an interrupt was delivered to the body.
    pub(crate) fn delivered_interrupt(&self) -> Option<FiberId> {
        let state = self.state.lock();
        if state.interrupt_delivered {
            state.interrupters.clone()
        } else {
            None
        }
    }

    /// Transitions to `Done` and hands back the children still running.
    pub(crate) fn finish(&self) -> Vec<Arc<Self>> {
        let mut state = self.state.lock();
        state.status = FiberStatus::Done;
        state.interrupt_wakers.take_all();
        std::mem::take(&mut state.children)
            .into_iter()
            .filter(|c| !c.status().is_done())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::Wake;

    struct Counter(AtomicUsize);

    impl Wake for Counter {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn core() -> FiberCore {
        FiberCore::new(FiberId::make(1, 1))
    }

    #[test]
    fn interrupt_is_deferred_in_uninterruptible_region() {
        let core = core();
        let depth = core.push_region(false);
        core.request_interrupt(&FiberId::make(2, 2));
        assert!(core.take_interrupt().is_none());
        core.truncate_regions(depth);
        let interrupted = core.take_interrupt().expect("delivered");
        assert_eq!(interrupted.by(), &FiberId::make(2, 2));
        assert_eq!(core.status(), FiberStatus::Interrupting);
        assert_eq!(core.delivered_interrupt(), Some(FiberId::make(2, 2)));
    }

    #[test]
    fn interrupters_accumulate() {
        let core = core();
        core.request_interrupt(&FiberId::make(2, 2));
        core.request_interrupt(&FiberId::make(3, 3));
        let interrupted = core.take_interrupt().expect("delivered");
        assert_eq!(
            interrupted.by(),
            &FiberId::make(2, 2).combine(&FiberId::make(3, 3))
        );
    }

    #[test]
    fn parked_fiber_is_woken_by_interrupt() {
        let core = core();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let waker = Waker::from(Arc::clone(&counter));
        let mut slot = None;
        assert!(core.park(&mut slot, &waker, "test", true).is_none());
        assert_eq!(core.status(), FiberStatus::Suspended { blocking_on: "test" });

        core.request_interrupt(&FiberId::make(9, 9));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(core.park(&mut slot, &waker, "test", true).is_some());
    }

    #[test]
    fn done_fiber_ignores_interrupts() {
        let core = core();
        let _ = core.finish();
        core.request_interrupt(&FiberId::make(2, 2));
        assert!(core.delivered_interrupt().is_none());
        assert!(core.take_interrupt().is_none());
    }

    #[test]
    fn region_stack_never_drops_base() {
        let core = core();
        core.truncate_regions(0);
        assert!(core.is_interruptible());
    }
}
