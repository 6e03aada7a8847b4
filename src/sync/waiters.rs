//! Keyed waker registry shared by suspension points.
//!
//! Each suspended poller gets a stable key so it can refresh its waker on a
//! spurious poll and deregister itself when dropped, without disturbing the
//! other waiters.

use smallvec::SmallVec;
use std::task::Waker;

#[derive(Debug, Default)]
pub(crate) struct WaiterSet {
    entries: SmallVec<[(u64, Waker); 4]>,
    next_key: u64,
}

impl WaiterSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers `waker` under `slot`, allocating a key on first use and
    /// refreshing the stored waker otherwise.
    pub(crate) fn register(&mut self, slot: &mut Option<u64>, waker: &Waker) {
        if let Some(key) = *slot {
            if let Some((_, existing)) = self.entries.iter_mut().find(|(k, _)| *k == key) {
                if !existing.will_wake(waker) {
                    existing.clone_from(waker);
                }
                return;
            }
        }
        let key = self.next_key;
        self.next_key = self.next_key.wrapping_add(1);
        self.entries.push((key, waker.clone()));
        *slot = Some(key);
    }

    pub(crate) fn remove(&mut self, key: u64) {
        self.entries.retain(|(k, _)| *k != key);
    }

    pub(crate) fn take_all(&mut self) -> SmallVec<[Waker; 4]> {
        self.entries.drain(..).map(|(_, w)| w).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::Wake;

    struct CountingWaker(AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting() -> (Arc<CountingWaker>, Waker) {
        let counter = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = Waker::from(Arc::clone(&counter));
        (counter, waker)
    }

    #[test]
    fn register_reuses_slot() {
        let (_, waker) = counting();
        let mut set = WaiterSet::new();
        let mut slot = None;
        set.register(&mut slot, &waker);
        set.register(&mut slot, &waker);
        assert_eq!(set.len(), 1);
        assert_eq!(slot, Some(0));
    }

    #[test]
    fn remove_only_drops_own_key() {
        let (_, a) = counting();
        let (_, b) = counting();
        let mut set = WaiterSet::new();
        let (mut sa, mut sb) = (None, None);
        set.register(&mut sa, &a);
        set.register(&mut sb, &b);
        set.remove(sa.unwrap_or_default());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn take_all_wakes_everyone() {
        let (ca, a) = counting();
        let (cb, b) = counting();
        let mut set = WaiterSet::new();
        set.register(&mut None, &a);
        set.register(&mut None, &b);
        for w in set.take_all() {
            w.wake();
        }
        assert!(set.is_empty());
        assert_eq!(ca.0.load(Ordering::SeqCst), 1);
        assert_eq!(cb.0.load(Ordering::SeqCst), 1);
    }
}
