//! The schedulable unit behind every fiber.
//!
//! A [`FiberTask`] owns the fiber's boxed future and doubles as its waker:
//! waking the task submits it to the scheduler, and an atomic `scheduled`
//! flag collapses any number of wake-ups into one queued poll.

use crate::runtime::scheduler::Scheduler;
use crate::types::cause::payload_to_string;
use crate::types::FiberId;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

pub(crate) type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub(crate) struct FiberTask {
    fiber_id: FiberId,
    future: Mutex<Option<TaskFuture>>,
    scheduled: AtomicBool,
    scheduler: Arc<dyn Scheduler>,
}

impl FiberTask {
    /// Wraps `future` in a task and queues its first poll.
    pub(crate) fn spawn(fiber_id: FiberId, scheduler: Arc<dyn Scheduler>, future: TaskFuture) {
        let task = Arc::new(Self {
            fiber_id,
            future: Mutex::new(Some(future)),
            scheduled: AtomicBool::new(true),
            scheduler,
        });
        task.submit();
    }

    fn submit(self: &Arc<Self>) {
        let task = Arc::clone(self);
        self.scheduler.submit(Box::new(move || task.run()));
    }

    fn run(self: Arc<Self>) {
        // Cleared before polling so a wake-up raised during the poll queues
        // another one.
        self.scheduled.store(false, Ordering::Release);

        let mut slot = self.future.lock();
        let Some(future) = slot.as_mut() else {
            return;
        };
        let waker = Waker::from(Arc::clone(&self));
        let mut cx = Context::from_waker(&waker);
        let result =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| future.as_mut().poll(&mut cx)));
        match result {
            Ok(Poll::Pending) => {}
            Ok(Poll::Ready(())) => {
                *slot = None;
            }
            Err(payload) => {
                tracing::error!(
                    fiber_id = %self.fiber_id,
                    message = %payload_to_string(payload.as_ref()),
                    "fiber task panicked outside its body"
                );
                *slot = None;
            }
        }
    }

    fn schedule(self: &Arc<Self>) {
        if !self.scheduled.swap(true, Ordering::AcqRel) {
            self.submit();
        }
    }
}

impl Wake for FiberTask {
    fn wake(self: Arc<Self>) {
        self.schedule();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.schedule();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::scheduler::Job;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    /// Scheduler that only queues; the test drives it by hand.
    #[derive(Default)]
    struct ManualScheduler {
        jobs: Mutex<VecDeque<Job>>,
    }

    impl ManualScheduler {
        fn run_all(&self) -> usize {
            let mut ran = 0;
            loop {
                let job = self.jobs.lock().pop_front();
                let Some(job) = job else {
                    return ran;
                };
                job();
                ran += 1;
            }
        }
    }

    impl Scheduler for ManualScheduler {
        fn submit(&self, job: Job) {
            self.jobs.lock().push_back(job);
        }
    }

    struct YieldTwice {
        polls: Arc<AtomicUsize>,
    }

    impl Future for YieldTwice {
        type Output = ();

        fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                // Several wake-ups in one poll still queue a single run.
                cx.waker().wake_by_ref();
                cx.waker().wake_by_ref();
                Poll::Pending
            } else {
                Poll::Ready(())
            }
        }
    }

    #[test]
    fn wakeups_are_deduplicated() {
        let scheduler = Arc::new(ManualScheduler::default());
        let polls = Arc::new(AtomicUsize::new(0));
        FiberTask::spawn(
            FiberId::make(1, 1),
            scheduler.clone(),
            Box::pin(YieldTwice {
                polls: Arc::clone(&polls),
            }),
        );
        assert_eq!(scheduler.run_all(), 3);
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }
}
