//! Multi-producer single-consumer queue

use crossbeam::queue::ArrayQueue;

/// Bounded MPSC queue built on crossbeam's lock-free array queue
///
/// Any number of producers may push concurrently; the engine pairs each
/// instance with a single draining consumer. Same non-blocking contract as
/// the other rings: full means the push fails and the caller counts the
/// drop.
pub struct Mpsc<T> {
    inner: ArrayQueue<T>,
}

impl<T> Mpsc<T> {
    /// Create a queue holding at least `capacity` items (rounded up to a
    /// power of two)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: ArrayQueue::new(capacity.next_power_of_two().max(2)),
        }
    }

    /// Push an item. Returns false when full.
    #[inline]
    pub fn try_push(&self, value: T) -> bool {
        self.inner.push(value).is_ok()
    }

    /// Pop an item. Returns None when empty.
    #[inline]
    pub fn try_pop(&self) -> Option<T> {
        self.inner.pop()
    }

    /// Number of queued items
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True when no items are queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Queue capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}
