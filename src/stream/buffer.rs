// SPDX-License-Identifier: MPL-2.0

//! The bounded SPSC ring buffer backing a stream.
//!
//! FastForward discipline: every slot carries its own publication flag, so
//! the producer and the consumer never share an index on the fast path. The
//! producer owns `tail`, the consumer owns `head`, and a slot's flag hands
//! the item data over with release/acquire ordering.

use core::cell::UnsafeCell;
use core::fmt;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

struct Slot<T> {
    full: AtomicBool,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Producer-side cursor, padded so the two sides do not share a cache line.
#[repr(align(128))]
struct ProdCursor {
    tail: AtomicUsize,
}

/// Consumer-side cursor.
#[repr(align(128))]
struct ConsCursor {
    head: AtomicUsize,
}

/// A bounded single-producer single-consumer ring.
///
/// The fast-path contract is positional: `put`/`is_space` may only be called
/// by the one producer, `pop`/`peek` only by the one consumer. The stream
/// endpoints uphold this by owning each side exclusively; the buffer itself
/// never locks.
///
/// Capacity is exact: a buffer created for `n` items holds at most `n`
/// items, with no rounding.
pub(crate) struct Buffer<T> {
    slots: Box<[Slot<T>]>,
    prod: ProdCursor,
    cons: ConsCursor,
}

// SAFETY: an item placed into a slot by the producer is handed over to the
// consumer through the slot flag, and each side mutates only its own cursor.
unsafe impl<T: Send> Send for Buffer<T> {}
unsafe impl<T: Send> Sync for Buffer<T> {}

impl<T> Buffer<T> {
    /// Creates a buffer holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics when `capacity` is zero.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        assert!(capacity >= 1, "a stream buffer holds at least one item");
        let slots = (0..capacity)
            .map(|_| Slot {
                full: AtomicBool::new(false),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            prod: ProdCursor {
                tail: AtomicUsize::new(0),
            },
            cons: ConsCursor {
                head: AtomicUsize::new(0),
            },
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Whether at least one slot is free. Producer side.
    pub(crate) fn is_space(&self) -> bool {
        let tail = self.prod.tail.load(Ordering::Relaxed);
        !self.slots[tail].full.load(Ordering::Acquire)
    }

    /// Appends `item`. Producer side; requires `is_space()`.
    pub(crate) fn put(&self, item: T) {
        let tail = self.prod.tail.load(Ordering::Relaxed);
        let slot = &self.slots[tail];
        debug_assert!(!slot.full.load(Ordering::Relaxed));
        // SAFETY: the slot is empty, so the consumer does not touch the
        // value until the flag below is set.
        unsafe { (*slot.value.get()).write(item) };
        slot.full.store(true, Ordering::Release);
        self.prod.tail.store(self.next(tail), Ordering::Relaxed);
    }

    /// Whether the oldest slot holds an item. Consumer side; also consulted
    /// by the polling consumer under the producer lock.
    pub(crate) fn has_item(&self) -> bool {
        let head = self.cons.head.load(Ordering::Relaxed);
        self.slots[head].full.load(Ordering::Acquire)
    }

    /// Returns the oldest item without consuming it, or `None` when the
    /// buffer is empty. Consumer side.
    pub(crate) fn peek(&self) -> Option<&T> {
        let head = self.cons.head.load(Ordering::Relaxed);
        let slot = &self.slots[head];
        if !slot.full.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: the slot is published and only the consumer retires it,
        // so the value stays in place while the caller holds the borrow.
        Some(unsafe { (*slot.value.get()).assume_init_ref() })
    }

    /// Removes and returns the oldest item, or `None` when the buffer is
    /// empty. Consumer side.
    pub(crate) fn pop(&self) -> Option<T> {
        let head = self.cons.head.load(Ordering::Relaxed);
        let slot = &self.slots[head];
        if !slot.full.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: the slot is published, and the producer does not write it
        // again until the flag below is cleared.
        let item = unsafe { (*slot.value.get()).assume_init_read() };
        slot.full.store(false, Ordering::Release);
        self.cons.head.store(self.next(head), Ordering::Relaxed);
        Some(item)
    }

    fn next(&self, index: usize) -> usize {
        if index + 1 == self.slots.len() {
            0
        } else {
            index + 1
        }
    }
}

impl<T> Drop for Buffer<T> {
    fn drop(&mut self) {
        // Drain undelivered items so their destructors run.
        while self.pop().is_some() {}
    }
}

impl<T> fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("capacity", &self.capacity())
            .field("head", &self.cons.head.load(Ordering::Relaxed))
            .field("tail", &self.prod.tail.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn fifo_order() {
        let buf = Buffer::with_capacity(4);
        for i in 0..4 {
            assert!(buf.is_space());
            buf.put(i);
        }
        assert!(!buf.is_space());
        for i in 0..4 {
            assert_eq!(buf.pop(), Some(i));
        }
        assert_eq!(buf.pop(), None);
    }

    #[test]
    fn exact_capacity() {
        // Capacity is not rounded up to a power of two.
        let buf = Buffer::with_capacity(3);
        assert_eq!(buf.capacity(), 3);
        for i in 0..3 {
            buf.put(i);
        }
        assert!(!buf.is_space());
        assert_eq!(buf.pop(), Some(0));
        assert!(buf.is_space());
    }

    #[test]
    fn peek_does_not_consume() {
        let buf = Buffer::with_capacity(2);
        assert!(buf.peek().is_none());
        buf.put(7);
        assert_eq!(buf.peek(), Some(&7));
        assert_eq!(buf.peek(), Some(&7));
        assert_eq!(buf.pop(), Some(7));
        assert!(buf.peek().is_none());
    }

    #[test]
    fn wraparound() {
        let buf = Buffer::with_capacity(2);
        for i in 0..7 {
            buf.put(i);
            assert_eq!(buf.pop(), Some(i));
        }
    }

    #[test]
    fn drop_drains_items() {
        let item = Arc::new(0);
        let buf = Buffer::with_capacity(2);
        buf.put(item.clone());
        buf.put(item.clone());
        assert_eq!(Arc::strong_count(&item), 3);
        drop(buf);
        assert_eq!(Arc::strong_count(&item), 1);
    }

    #[test]
    fn concurrent_fifo() {
        let buf = Arc::new(Buffer::with_capacity(4));
        let producer = {
            let buf = buf.clone();
            thread::spawn(move || {
                for i in 0..100_000u64 {
                    while !buf.is_space() {
                        thread::yield_now();
                    }
                    buf.put(i);
                }
            })
        };
        for i in 0..100_000u64 {
            loop {
                if let Some(got) = buf.pop() {
                    assert_eq!(got, i);
                    break;
                }
                thread::yield_now();
            }
        }
        producer.join().unwrap();
    }
}
