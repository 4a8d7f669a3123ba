//! Bounded single-producer/single-consumer hand-off with drop-oldest
//! overflow.
//!
//! The pipeline stages are connected by these rings. The drop policy is
//! deliberately newest-preserving: a producer is never blocked by a slow
//! consumer, and a dropped element is preferable to the consumer acting on
//! stale data. Head and tail updates are serialized by a mutex so `push`
//! and `pop` are never observed in a torn state.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

struct Shared<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
}

/// Producer half of a ring.
pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

/// Consumer half of a ring.
pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

/// Create a ring of the given capacity. Panics if `capacity` is zero.
pub fn ring<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    assert!(capacity > 0, "ring capacity must be nonzero");
    let shared = Arc::new(Shared {
        queue: Mutex::new(VecDeque::with_capacity(capacity)),
        capacity,
    });
    (
        Sender {
            shared: shared.clone(),
        },
        Receiver { shared },
    )
}

impl<T> Sender<T> {
    /// Append an element. When the ring is full the oldest element is
    /// overwritten and returned so the caller can log the drop.
    pub fn push(&self, item: T) -> Option<T> {
        let mut q = self.shared.queue.lock().unwrap();
        let dropped = if q.len() == self.shared.capacity {
            q.pop_front()
        } else {
            None
        };
        q.push_back(item);
        dropped
    }

    pub fn len(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// True once the consumer half has been dropped.
    pub fn is_disconnected(&self) -> bool {
        Arc::strong_count(&self.shared) < 2
    }
}

impl<T> Receiver<T> {
    /// Remove and return the oldest element, or `None` when empty. Never
    /// blocks.
    pub fn pop(&self) -> Option<T> {
        self.shared.queue.lock().unwrap().pop_front()
    }

    /// Discard everything buffered and return the newest element, if any.
    pub fn pop_newest(&self) -> Option<T> {
        let mut q = self.shared.queue.lock().unwrap();
        let newest = q.pop_back();
        q.clear();
        newest
    }

    pub fn len(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// True once the producer half has been dropped.
    pub fn is_disconnected(&self) -> bool {
        Arc::strong_count(&self.shared) < 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let (tx, rx) = ring(4);
        for i in 0..3 {
            assert!(tx.push(i).is_none());
        }
        assert_eq!(rx.pop(), Some(0));
        assert_eq!(rx.pop(), Some(1));
        assert_eq!(rx.pop(), Some(2));
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn overflow_drops_oldest_preserving_fifo() {
        // After pushing N items into a capacity-K ring with no pops (N>K),
        // the N-K oldest are dropped and the remaining K keep FIFO order.
        let (tx, rx) = ring(3);
        let mut dropped = Vec::new();
        for i in 0..10 {
            if let Some(d) = tx.push(i) {
                dropped.push(d);
            }
        }
        assert_eq!(dropped, vec![0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(rx.len(), 3);
        assert_eq!(rx.pop(), Some(7));
        assert_eq!(rx.pop(), Some(8));
        assert_eq!(rx.pop(), Some(9));
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn pop_newest_discards_backlog() {
        let (tx, rx) = ring(8);
        for i in 0..5 {
            tx.push(i);
        }
        assert_eq!(rx.pop_newest(), Some(4));
        assert!(rx.is_empty());
    }

    #[test]
    fn concurrent_push_pop_not_torn() {
        let (tx, rx) = ring(16);
        let producer = std::thread::spawn(move || {
            for i in 0u64..10_000 {
                tx.push(i);
            }
        });
        let mut last = None;
        loop {
            match rx.pop() {
                Some(v) => {
                    // Values always come out in increasing order even while
                    // the producer is overwriting.
                    if let Some(prev) = last {
                        assert!(v > prev, "out of order: {v} after {prev}");
                    }
                    last = Some(v);
                    if v == 9_999 {
                        break;
                    }
                }
                None => {
                    if rx.is_disconnected() && rx.is_empty() {
                        break;
                    }
                    std::thread::yield_now();
                }
            }
        }
        producer.join().unwrap();
    }

    #[test]
    fn disconnect_is_observable() {
        let (tx, rx) = ring::<u8>(1);
        assert!(!rx.is_disconnected());
        drop(tx);
        assert!(rx.is_disconnected());
    }
}
