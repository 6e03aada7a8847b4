//! Timer thread and deadline heap.
//!
//! Sleeping fibers register a waker with a deadline. A single timer thread
//! keeps the entries in a min-heap and wakes everything whose deadline has
//! passed, parking on a condition variable until the earliest remaining
//! deadline otherwise.

use crate::error::{Error, ErrorKind};
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::task::Waker;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// A timer entry in the heap.
#[derive(Debug)]
struct TimerEntry {
    deadline: Instant,
    /// Tie-breaker so equal deadlines fire in registration order.
    generation: u64,
    waker: Waker,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.generation == other.generation
    }
}

impl Eq for TimerEntry {}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first)
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A min-heap of wakers ordered by deadline.
#[derive(Debug, Default)]
pub(crate) struct TimerHeap {
    heap: BinaryHeap<TimerEntry>,
    next_generation: u64,
}

impl TimerHeap {
    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn insert(&mut self, deadline: Instant, waker: Waker) {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.heap.push(TimerEntry {
            deadline,
            generation,
            waker,
        });
    }

    pub(crate) fn peek_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.deadline)
    }

    /// Pops every waker whose deadline is at or before `now`.
    pub(crate) fn pop_expired(&mut self, now: Instant) -> Vec<Waker> {
        let mut expired = Vec::new();
        while self.heap.peek().is_some_and(|e| e.deadline <= now) {
            if let Some(entry) = self.heap.pop() {
                expired.push(entry.waker);
            }
        }
        expired
    }
}

#[derive(Debug, Default)]
struct TimerState {
    heap: TimerHeap,
    shutdown: bool,
}

#[derive(Debug, Default)]
struct TimerShared {
    state: Mutex<TimerState>,
    condvar: Condvar,
}

/// Owns the timer thread.
#[derive(Debug)]
pub(crate) struct TimerDriver {
    shared: Arc<TimerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TimerDriver {
    pub(crate) fn start(thread_name: String) -> Result<Self, Error> {
        let shared = Arc::new(TimerShared::default());
        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || timer_loop(&thread_shared))
            .map_err(|e| {
                Error::new(ErrorKind::ThreadSpawn)
                    .with_message("failed to spawn timer thread")
                    .with_source(e)
            })?;
        Ok(Self {
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Wakes `waker` once `deadline` has passed.
    pub(crate) fn register(&self, deadline: Instant, waker: Waker) {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return;
        }
        let earliest = state.heap.peek_deadline();
        state.heap.insert(deadline, waker);
        if earliest.map_or(true, |e| deadline < e) {
            self.shared.condvar.notify_one();
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.shared.state.lock().heap.len()
    }

    pub(crate) fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            self.shared.condvar.notify_all();
        }
        if let Some(handle) = self.thread.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for TimerDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn timer_loop(shared: &TimerShared) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            break;
        }
        let expired = state.heap.pop_expired(Instant::now());
        if !expired.is_empty() {
            drop(state);
            for waker in expired {
                waker.wake();
            }
            state = shared.state.lock();
            continue;
        }
        match state.heap.peek_deadline() {
            Some(deadline) => {
                let _ = shared.condvar.wait_until(&mut state, deadline);
            }
            None => shared.condvar.wait(&mut state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
    use std::task::Wake;
    use std::time::Duration;

    struct Flag(AtomicBool);

    impl Wake for Flag {
        fn wake(self: Arc<Self>) {
            self.0.store(true, AtomicOrdering::SeqCst);
        }
    }

    fn flag_waker() -> (Arc<Flag>, Waker) {
        let flag = Arc::new(Flag(AtomicBool::new(false)));
        (Arc::clone(&flag), Waker::from(flag))
    }

    #[test]
    fn earliest_first() {
        let now = Instant::now();
        let mut heap = TimerHeap::default();
        let (a, wa) = flag_waker();
        let (b, wb) = flag_waker();
        let (c, wc) = flag_waker();
        heap.insert(now + Duration::from_millis(100), wa);
        heap.insert(now + Duration::from_millis(50), wb);
        heap.insert(now + Duration::from_millis(150), wc);

        assert_eq!(heap.peek_deadline(), Some(now + Duration::from_millis(50)));

        for waker in heap.pop_expired(now + Duration::from_millis(100)) {
            waker.wake();
        }
        assert!(a.0.load(AtomicOrdering::SeqCst));
        assert!(b.0.load(AtomicOrdering::SeqCst));
        assert!(!c.0.load(AtomicOrdering::SeqCst));
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn driver_fires_registered_waker() {
        let driver = TimerDriver::start("fiberscope-timer-test".into()).expect("timer");
        let (flag, waker) = flag_waker();
        driver.register(Instant::now() + Duration::from_millis(10), waker);

        let deadline = Instant::now() + Duration::from_secs(5);
        while !flag.0.load(AtomicOrdering::SeqCst) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(flag.0.load(AtomicOrdering::SeqCst));
        assert_eq!(driver.pending(), 0);
        driver.shutdown();
    }
}
