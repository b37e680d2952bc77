//! Single-producer single-consumer ring buffer

use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Bounded SPSC ring with cached counterpart indices
///
/// Exactly one thread may push and exactly one thread may pop; the cached
/// head/tail copies keep the common case free of cross-core traffic. One
/// slot is reserved to distinguish full from empty.
pub struct Spsc<T> {
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    // Producer-local copy of head, consumer-local copy of tail. Each cell
    // is touched only by its owning side, which is what makes the
    // UnsafeCell access sound under the SPSC contract.
    cached_head: CachePadded<UnsafeCell<usize>>,
    cached_tail: CachePadded<UnsafeCell<usize>>,
}

unsafe impl<T: Send> Send for Spsc<T> {}
unsafe impl<T: Send> Sync for Spsc<T> {}

impl<T> Spsc<T> {
    /// Create a ring holding at least `capacity` items (rounded up to a
    /// power of two)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let size = capacity.next_power_of_two().max(2);
        let buffer = (0..size)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            buffer,
            mask: size - 1,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            cached_head: CachePadded::new(UnsafeCell::new(0)),
            cached_tail: CachePadded::new(UnsafeCell::new(0)),
        }
    }

    /// Push from the producer side. Returns false when full.
    #[inline]
    pub fn try_push(&self, value: T) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let next_tail = (tail + 1) & self.mask;

        let cached_head = unsafe { *self.cached_head.get() };
        if next_tail == cached_head {
            let head = self.head.load(Ordering::Acquire);
            unsafe { *self.cached_head.get() = head };
            if next_tail == head {
                return false;
            }
        }

        unsafe {
            (*self.buffer[tail].get()).write(value);
        }
        self.tail.store(next_tail, Ordering::Release);
        true
    }

    /// Pop from the consumer side. Returns None when empty.
    #[inline]
    pub fn try_pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);

        let cached_tail = unsafe { *self.cached_tail.get() };
        if head == cached_tail {
            let tail = self.tail.load(Ordering::Acquire);
            unsafe { *self.cached_tail.get() = tail };
            if head == tail {
                return None;
            }
        }

        let value = unsafe { (*self.buffer[head].get()).assume_init_read() };
        self.head.store((head + 1) & self.mask, Ordering::Release);
        Some(value)
    }

    /// Approximate number of queued items
    #[must_use]
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head) & self.mask
    }

    /// True when no items are queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    /// Usable capacity (one slot is reserved)
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.len() - 1
    }
}

impl<T> Drop for Spsc<T> {
    fn drop(&mut self) {
        let mut head = *self.head.get_mut();
        let tail = *self.tail.get_mut();
        while head != tail {
            unsafe {
                (*self.buffer[head].get()).assume_init_drop();
            }
            head = (head + 1) & self.mask;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_push_pop_order() {
        let ring = Spsc::new(8);
        for i in 0..5 {
            assert!(ring.try_push(i));
        }
        assert_eq!(ring.len(), 5);
        for i in 0..5 {
            assert_eq!(ring.try_pop(), Some(i));
        }
        assert!(ring.try_pop().is_none());
        assert!(ring.is_empty());
    }

    #[test]
    fn test_full_rejects_push() {
        let ring = Spsc::new(4);
        let cap = ring.capacity();
        for i in 0..cap {
            assert!(ring.try_push(i));
        }
        assert!(!ring.try_push(99));
        assert_eq!(ring.try_pop(), Some(0));
        assert!(ring.try_push(99));
    }

    #[test]
    fn test_capacity_rounds_to_power_of_two() {
        let ring: Spsc<u8> = Spsc::new(5);
        assert_eq!(ring.capacity(), 7);
    }

    #[test]
    fn test_cross_thread_transfer() {
        let ring = Arc::new(Spsc::new(1024));
        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                let mut pushed = 0u64;
                while pushed < 10_000 {
                    if ring.try_push(pushed) {
                        pushed += 1;
                    } else {
                        thread::yield_now();
                    }
                }
            })
        };

        let mut expected = 0u64;
        while expected < 10_000 {
            if let Some(value) = ring.try_pop() {
                assert_eq!(value, expected);
                expected += 1;
            } else {
                thread::yield_now();
            }
        }
        producer.join().expect("producer thread");
    }

    #[test]
    fn test_drop_releases_queued_items() {
        let ring = Spsc::new(8);
        for i in 0..4 {
            assert!(ring.try_push(Arc::new(i)));
        }
        drop(ring);
    }
}
