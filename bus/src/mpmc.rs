//! Multi-producer multi-consumer sequenced-cell ring

use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Cell<T> {
    sequence: AtomicUsize,
    data: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded MPMC ring using per-cell sequence numbers
///
/// Each cell carries a sequence that encodes whether it is free for the
/// producer at a given position or holds data for the consumer at that
/// position, so producers and consumers only contend on their own cursor.
pub struct Mpmc<T> {
    buffer: Box<[Cell<T>]>,
    mask: usize,
    enqueue_pos: CachePadded<AtomicUsize>,
    dequeue_pos: CachePadded<AtomicUsize>,
}

unsafe impl<T: Send> Send for Mpmc<T> {}
unsafe impl<T: Send> Sync for Mpmc<T> {}

impl<T> Mpmc<T> {
    /// Create a ring holding at least `capacity` items (rounded up to a
    /// power of two)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let size = capacity.next_power_of_two().max(2);
        let buffer = (0..size)
            .map(|i| Cell {
                sequence: AtomicUsize::new(i),
                data: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            buffer,
            mask: size - 1,
            enqueue_pos: CachePadded::new(AtomicUsize::new(0)),
            dequeue_pos: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Push an item. Returns false when full.
    pub fn try_push(&self, value: T) -> bool {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let cell = &self.buffer[pos & self.mask];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq as isize - pos as isize;

            if diff == 0 {
                if self
                    .enqueue_pos
                    .compare_exchange_weak(pos, pos + 1, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    unsafe {
                        (*cell.data.get()).write(value);
                    }
                    cell.sequence.store(pos + 1, Ordering::Release);
                    return true;
                }
            } else if diff < 0 {
                return false;
            } else {
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Pop an item. Returns None when empty.
    pub fn try_pop(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        loop {
            let cell = &self.buffer[pos & self.mask];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq as isize - (pos + 1) as isize;

            if diff == 0 {
                if self
                    .dequeue_pos
                    .compare_exchange_weak(pos, pos + 1, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    let value = unsafe { (*cell.data.get()).assume_init_read() };
                    cell.sequence.store(pos + self.mask + 1, Ordering::Release);
                    return Some(value);
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// True when no items are queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let pos = self.dequeue_pos.load(Ordering::Acquire);
        let cell = &self.buffer[pos & self.mask];
        cell.sequence.load(Ordering::Acquire) <= pos
    }

    /// Queue capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }
}

impl<T> Drop for Mpmc<T> {
    fn drop(&mut self) {
        while self.try_pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU64;
    use std::thread;

    #[test]
    fn test_push_pop_fifo() {
        let ring = Mpmc::new(8);
        for i in 0..8 {
            assert!(ring.try_push(i));
        }
        assert!(!ring.try_push(99));
        for i in 0..8 {
            assert_eq!(ring.try_pop(), Some(i));
        }
        assert!(ring.try_pop().is_none());
        assert!(ring.is_empty());
    }

    #[test]
    fn test_wraparound() {
        let ring = Mpmc::new(4);
        for round in 0..10 {
            for i in 0..4 {
                assert!(ring.try_push(round * 4 + i));
            }
            for i in 0..4 {
                assert_eq!(ring.try_pop(), Some(round * 4 + i));
            }
        }
    }

    #[test]
    fn test_concurrent_producers_consumers() {
        let ring = Arc::new(Mpmc::new(1024));
        let total = Arc::new(AtomicU64::new(0));
        const PRODUCERS: u64 = 3;
        const CONSUMERS: u64 = 3;
        const PER_PRODUCER: u64 = 5_000;

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|_| {
                let ring = Arc::clone(&ring);
                thread::spawn(move || {
                    for i in 1..=PER_PRODUCER {
                        while !ring.try_push(i) {
                            thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        let consumed = Arc::new(AtomicU64::new(0));
        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                let ring = Arc::clone(&ring);
                let total = Arc::clone(&total);
                let consumed = Arc::clone(&consumed);
                thread::spawn(move || {
                    while consumed.load(Ordering::Relaxed) < PRODUCERS * PER_PRODUCER {
                        if let Some(value) = ring.try_pop() {
                            total.fetch_add(value, Ordering::Relaxed);
                            consumed.fetch_add(1, Ordering::Relaxed);
                        } else {
                            thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        for handle in producers {
            handle.join().expect("producer");
        }
        for handle in consumers {
            handle.join().expect("consumer");
        }

        let expected = PRODUCERS * (PER_PRODUCER * (PER_PRODUCER + 1) / 2);
        assert_eq!(total.load(Ordering::Relaxed), expected);
    }
}
