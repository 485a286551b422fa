//! Fixed-capacity FIFO of item locators shared between producers and the controller loop.
//!
//! Producers (menu handlers, buttons, end-of-queue handlers) enqueue from any thread; the
//! controller's execution context is the only consumer. Every operation takes the ring lock
//! with a short bounded wait and reports a timeout as a soft, retryable failure.
//!
//! ## Ring layout
//! The ring has `capacity + 1` slots. One slot is always left free so that
//! `write == read` means empty and `write + 1 == read` means full, without a separate counter.
//! A read cursor of `None` is the "never written / cleared" sentinel.

use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::error::QueueError;
use crate::locator;

/// Thread-safe bounded queue of item locators.
pub struct BoundedItemQueue {
    ring: Mutex<Ring>,
    capacity: usize,
    max_len: usize,
    lock_timeout: Duration,
}

struct Ring {
    /// Preallocated slots; enqueue copies into them without reallocating.
    slots: Vec<String>,
    read: Option<usize>,
    write: usize,
    /// Set by `clear_and_hold`; consumption is refused until `release_hold`.
    held: bool,
}

impl Ring {
    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn len(&self) -> usize {
        match self.read {
            None => 0,
            Some(read) => (self.write + self.slot_count() - read) % self.slot_count(),
        }
    }

    fn is_full(&self) -> bool {
        match self.read {
            None => false,
            Some(read) => (self.write + 1) % self.slot_count() == read,
        }
    }

    fn reset(&mut self) {
        self.read = None;
        self.write = 0;
    }
}

impl BoundedItemQueue {
    /// Create a queue that holds up to `capacity` locators of at most `max_len` bytes.
    ///
    /// A `capacity` of zero is raised to one.
    pub fn new(capacity: usize, max_len: usize, lock_timeout: Duration) -> Self {
        let capacity = capacity.max(1);
        let slot_count = capacity + 1;
        let slots = (0..slot_count)
            .map(|_| String::with_capacity(max_len))
            .collect();
        Self {
            ring: Mutex::new(Ring {
                slots,
                read: None,
                write: 0,
                held: false,
            }),
            capacity,
            max_len,
            lock_timeout,
        }
    }

    /// Usable capacity (slots minus the reserved one).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a copy of `item`. Returns `false` without mutating the queue on failure.
    pub fn enqueue(&self, item: &str) -> bool {
        match self.try_enqueue(item) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(item, error = %e, "enqueue rejected");
                false
            }
        }
    }

    /// Typed variant of [`BoundedItemQueue::enqueue`].
    pub fn try_enqueue(&self, item: &str) -> Result<(), QueueError> {
        locator::validate(item, self.max_len)?;
        let mut g = self.lock_within()?;
        if g.is_full() {
            return Err(QueueError::Full);
        }

        let write = g.write;
        let slot = &mut g.slots[write];
        slot.clear();
        slot.push_str(item);

        g.write = (write + 1) % g.slot_count();
        if g.read.is_none() {
            g.read = Some(write);
        }
        Ok(())
    }

    /// Remove and return the oldest locator, or `None` when empty, held, or contended.
    pub fn dequeue(&self) -> Option<String> {
        self.try_dequeue().ok().flatten()
    }

    /// Typed variant of [`BoundedItemQueue::dequeue`].
    ///
    /// `Ok(None)` means the queue is genuinely empty; errors mean "try again later".
    pub fn try_dequeue(&self) -> Result<Option<String>, QueueError> {
        let mut g = self.lock_within()?;
        if g.held {
            return Err(QueueError::Held);
        }
        let Some(read) = g.read else {
            return Ok(None);
        };
        if read == g.write {
            return Ok(None);
        }

        let item = g.slots[read].as_str().to_owned();
        g.read = Some((read + 1) % g.slot_count());
        Ok(Some(item))
    }

    /// Empty the queue by returning both cursors to the sentinel state.
    pub fn clear_and_reset(&self) -> Result<(), QueueError> {
        let mut g = self.lock_within()?;
        g.reset();
        Ok(())
    }

    /// Empty the queue and refuse consumption until [`BoundedItemQueue::release_hold`].
    ///
    /// Producers may keep enqueueing while the hold is active; those items survive the reset.
    pub fn clear_and_hold(&self) -> Result<(), QueueError> {
        let mut g = self.lock_within()?;
        g.reset();
        g.held = true;
        Ok(())
    }

    /// Lift a hold placed by [`BoundedItemQueue::clear_and_hold`]. Blocks until acquired.
    pub fn release_hold(&self) {
        let mut g = self.ring.lock();
        g.held = false;
    }

    /// Number of queued locators (best-effort snapshot).
    pub fn len(&self) -> usize {
        self.lock_within().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Acquire the ring lock, giving up after `lock_timeout`.
    fn lock_within(&self) -> Result<MutexGuard<'_, Ring>, QueueError> {
        self.ring
            .try_lock_for(self.lock_timeout)
            .ok_or(QueueError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn queue(capacity: usize) -> BoundedItemQueue {
        BoundedItemQueue::new(capacity, 256, Duration::from_millis(20))
    }

    #[test]
    fn capacity_three_scenario() {
        let q = queue(3);
        assert!(q.enqueue("a"));
        assert!(q.enqueue("b"));
        assert!(q.enqueue("c"));
        assert!(!q.enqueue("d"));
        assert_eq!(q.dequeue().as_deref(), Some("a"));
        assert!(q.enqueue("d"));
        assert_eq!(q.dequeue().as_deref(), Some("b"));
        assert_eq!(q.dequeue().as_deref(), Some("c"));
        assert_eq!(q.dequeue().as_deref(), Some("d"));
        assert_eq!(q.dequeue(), None);
    }

    #[test]
    fn new_queue_is_empty_sentinel() {
        let q = queue(2);
        assert!(q.is_empty());
        assert_eq!(q.try_dequeue(), Ok(None));
    }

    #[test]
    fn full_enqueue_leaves_contents_unchanged() {
        let q = queue(2);
        assert!(q.enqueue("x"));
        assert!(q.enqueue("y"));
        assert_eq!(q.try_enqueue("z"), Err(QueueError::Full));
        assert_eq!(q.try_enqueue("z"), Err(QueueError::Full));
        assert_eq!(q.len(), 2);
        assert_eq!(q.dequeue().as_deref(), Some("x"));
        assert_eq!(q.dequeue().as_deref(), Some("y"));
        assert!(q.is_empty());
    }

    #[test]
    fn occupancy_never_exceeds_reserved_slot_bound_across_wraps() {
        let q = queue(4);
        let mut expected = std::collections::VecDeque::new();
        let mut next = 0u32;
        // Interleave bursts of enqueues and dequeues so the cursors wrap many times.
        for round in 0..50 {
            for _ in 0..(round % 6) {
                let item = format!("item-{next}");
                if q.enqueue(&item) {
                    expected.push_back(item);
                    next += 1;
                }
                assert!(q.len() <= q.capacity());
            }
            for _ in 0..(round % 4) {
                assert_eq!(q.dequeue(), expected.pop_front());
            }
        }
        while let Some(item) = expected.pop_front() {
            assert_eq!(q.dequeue(), Some(item));
        }
        assert_eq!(q.dequeue(), None);
    }

    #[test]
    fn long_locator_is_rejected_without_mutation() {
        let q = BoundedItemQueue::new(2, 4, Duration::from_millis(20));
        assert_eq!(
            q.try_enqueue("12345"),
            Err(QueueError::LocatorTooLong { len: 5, max: 4 })
        );
        assert!(q.is_empty());
    }

    #[test]
    fn lock_contention_times_out_softly() {
        let q = BoundedItemQueue::new(2, 256, Duration::from_millis(5));
        let guard = q.ring.lock();
        assert_eq!(q.try_enqueue("a"), Err(QueueError::Timeout));
        assert!(!q.enqueue("a"));
        assert_eq!(q.try_dequeue(), Err(QueueError::Timeout));
        drop(guard);
        assert!(q.enqueue("a"));
    }

    #[test]
    fn waiter_gets_the_lock_once_it_is_released() {
        let q = Arc::new(BoundedItemQueue::new(2, 256, Duration::from_secs(2)));
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = {
            let q = q.clone();
            thread::spawn(move || {
                let _guard = q.ring.lock();
                locked_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(30));
            })
        };
        locked_rx.recv().unwrap();
        assert!(q.enqueue("a"));
        holder.join().unwrap();
        assert_eq!(q.dequeue().as_deref(), Some("a"));
    }

    #[test]
    fn clear_and_reset_returns_to_sentinel() {
        let q = queue(3);
        q.enqueue("a");
        q.enqueue("b");
        q.dequeue();
        q.clear_and_reset().unwrap();
        assert!(q.is_empty());
        assert_eq!(q.dequeue(), None);
        assert!(q.enqueue("c"));
        assert_eq!(q.dequeue().as_deref(), Some("c"));
    }

    #[test]
    fn hold_blocks_consumption_but_not_production() {
        let q = queue(3);
        q.enqueue("old");
        q.clear_and_hold().unwrap();
        assert!(q.enqueue("new"));
        assert_eq!(q.try_dequeue(), Err(QueueError::Held));
        q.release_hold();
        assert_eq!(q.dequeue().as_deref(), Some("new"));
    }

    #[test]
    fn concurrent_producers_keep_per_producer_order() {
        let q = Arc::new(BoundedItemQueue::new(64, 256, Duration::from_millis(200)));
        let barrier = Arc::new(Barrier::new(3));
        let mut handles = Vec::new();
        for producer in 0..2 {
            let q = q.clone();
            let barrier = barrier.clone();
            handles.push(thread::spawn(move || {
                barrier.wait();
                for i in 0..20 {
                    while !q.enqueue(&format!("{producer}:{i}")) {
                        thread::yield_now();
                    }
                }
            }));
        }
        barrier.wait();
        for h in handles {
            h.join().unwrap();
        }

        let mut last = [-1i32; 2];
        while let Some(item) = q.dequeue() {
            let (p, i) = item.split_once(':').unwrap();
            let p: usize = p.parse().unwrap();
            let i: i32 = i.parse().unwrap();
            assert!(i > last[p]);
            last[p] = i;
        }
        assert_eq!(last, [19, 19]);
    }
}
