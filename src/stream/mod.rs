// SPDX-License-Identifier: MPL-2.0

//! Streams: unidirectional single-producer single-consumer channels between
//! tasks.
//!
//! A task uses a stream through a descriptor obtained by opening the stream
//! for one direction: [`Stream::open_write`] yields the producer end,
//! [`Stream::open_read`] the consumer end. Only the stream itself is shared;
//! a descriptor belongs to the task that opened it.
//!
//! Synchronization between the two tasks follows a signed-semaphore scheme:
//! `n_sem` counts readable items minus waiting readers, `e_sem` counts free
//! slots minus waiting writers. Each side pays a single atomic RMW on the
//! uncontended path and suspends through the task layer when it hits the
//! `-1` threshold, to be woken by the peer crossing it back. A consumer
//! waiting on several streams at once goes through [`StreamSet::poll`].

mod buffer;
mod set;
#[cfg(test)]
mod test_util;

pub use self::set::StreamSet;

use std::fmt;
use std::sync::atomic::{AtomicIsize, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use log::debug;

use self::buffer::Buffer;
use crate::config;
use crate::monitor::StreamMonitor;
use crate::prelude::*;
use crate::sync::{ProdLock, SpinLock};
use crate::task::{BlockedOn, Task};

/// Identifies a stream in monitoring output. Unique within the process.
pub type StreamUid = u64;

static STREAM_SEQ: AtomicU64 = AtomicU64::new(0);

/// The direction a descriptor opened its stream in.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Mode {
    Read,
    Write,
}

/// The shared identity of an open descriptor.
///
/// Producers publish this as the poll wakeup for the consumer task, and the
/// stream keeps weak back-references to the attached descriptor of each
/// direction. The typed endpoint handles [`StreamProd`] and [`StreamCons`]
/// own the capability to actually move items.
pub(crate) struct StreamDesc {
    pub(crate) task: Arc<Task>,
    pub(crate) mode: Mode,
    pub(crate) mon: Option<Box<dyn StreamMonitor>>,
}

/// A stream shared between one producer task and one consumer task.
pub struct Stream<T> {
    buffer: Buffer<T>,
    uid: StreamUid,
    /// Number of readable items minus the number of waiting readers.
    n_sem: AtomicIsize,
    /// Number of free slots minus the number of waiting writers.
    e_sem: AtomicIsize,
    /// Whether a consumer polls this stream. The lock also makes
    /// put-item-then-check-poll atomic against the poll registration.
    is_poll: ProdLock<bool>,
    prod_sd: SpinLock<Option<Weak<StreamDesc>>>,
    cons_sd: SpinLock<Option<Weak<StreamDesc>>>,
}

impl<T: Send> Stream<T> {
    /// Creates a stream holding at most `size` items. A `size` of zero
    /// selects the configured default capacity.
    pub fn with_capacity(size: usize) -> Arc<Self> {
        let capacity = if size == 0 {
            config::DEFAULT_STREAM_CAPACITY
        } else {
            size
        };
        let uid = STREAM_SEQ.fetch_add(1, Ordering::Relaxed);
        debug!("create stream {} with capacity {}", uid, capacity);
        Arc::new(Self {
            buffer: Buffer::with_capacity(capacity),
            uid,
            n_sem: AtomicIsize::new(0),
            e_sem: AtomicIsize::new(capacity as isize),
            is_poll: ProdLock::new(false),
            prod_sd: SpinLock::new(None),
            cons_sd: SpinLock::new(None),
        })
    }

    /// The unique id of this stream.
    pub fn uid(&self) -> StreamUid {
        self.uid
    }

    /// The maximum number of items the stream holds.
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Opens the stream for writing by the current task.
    ///
    /// # Panics
    ///
    /// Panics when the stream already has a producer, or when the calling
    /// thread does not host a task.
    pub fn open_write(self: &Arc<Self>) -> StreamProd<T> {
        let desc = self.attach(Mode::Write);
        StreamProd {
            desc,
            stream: self.clone(),
        }
    }

    /// Opens the stream for reading by the current task.
    ///
    /// # Panics
    ///
    /// Panics when the stream already has a consumer, or when the calling
    /// thread does not host a task.
    pub fn open_read(self: &Arc<Self>) -> StreamCons<T> {
        let desc = self.attach(Mode::Read);
        StreamCons {
            desc,
            stream: self.clone(),
        }
    }

    fn attach(&self, mode: Mode) -> Arc<StreamDesc> {
        let task = Task::current();
        let mon = task.open_monitor(self.uid, mode);
        let desc = Arc::new(StreamDesc { task, mode, mon });
        self.attach_desc(&desc);
        debug!(
            "task {} opens stream {} for {:?}",
            desc.task.tid(),
            self.uid,
            mode
        );
        desc
    }
}

impl<T> Stream<T> {
    fn endpoint(&self, mode: Mode) -> &SpinLock<Option<Weak<StreamDesc>>> {
        match mode {
            Mode::Read => &self.cons_sd,
            Mode::Write => &self.prod_sd,
        }
    }

    fn attach_desc(&self, desc: &Arc<StreamDesc>) {
        let mut slot = self.endpoint(desc.mode).lock();
        assert!(
            slot.as_ref().and_then(|weak| weak.upgrade()).is_none(),
            "stream {} is already open for {:?}",
            self.uid,
            desc.mode,
        );
        *slot = Some(Arc::downgrade(desc));
    }

    fn detach_desc(&self, desc: &Arc<StreamDesc>) {
        let mut slot = self.endpoint(desc.mode).lock();
        let attached = slot.as_ref().and_then(|weak| weak.upgrade());
        if attached.is_some_and(|attached| Arc::ptr_eq(&attached, desc)) {
            *slot = None;
        }
    }

    /// The descriptor currently attached to the consumer side.
    fn cons_desc(&self) -> Option<Arc<StreamDesc>> {
        self.cons_sd.lock().as_ref().and_then(|weak| weak.upgrade())
    }

    /// The descriptor currently attached to the producer side.
    fn prod_desc(&self) -> Option<Arc<StreamDesc>> {
        self.prod_sd.lock().as_ref().and_then(|weak| weak.upgrade())
    }
}

impl<T> fmt::Debug for Stream<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Stream")
            .field("uid", &self.uid)
            .field("capacity", &self.buffer.capacity())
            .finish()
    }
}

/// The producer end of a stream.
///
/// The handle is owned by the task that opened the stream for writing; it is
/// not clonable, which is what makes the single-producer fast path of the
/// buffer sound. Dropping the handle closes the descriptor; the stream
/// itself is released with its last reference.
pub struct StreamProd<T> {
    desc: Arc<StreamDesc>,
    stream: Arc<Stream<T>>,
}

impl<T: Send> StreamProd<T> {
    /// The stream this descriptor writes to.
    pub fn stream(&self) -> &Arc<Stream<T>> {
        &self.stream
    }

    /// Writes `item` to the stream, suspending the task while the stream is
    /// full.
    pub fn write(&mut self, item: T) {
        let stream = &self.stream;
        if config::STREAM_DEBUG_LOG {
            log::trace!(
                "task {} writes to stream {}",
                self.desc.task.tid(),
                stream.uid
            );
        }

        // quasi P(e_sem)
        if stream.e_sem.fetch_sub(1, Ordering::AcqRel) == 0 {
            if let Some(mon) = &self.desc.mon {
                mon.on_block();
            }
            self.desc.task.block(BlockedOn::Output);
        }

        // Putting the item and checking for a polling consumer must be
        // atomic against the consumer's poll registration.
        let mut poll_wakeup = None;
        {
            let mut is_poll = stream.is_poll.lock();
            debug_assert!(stream.buffer.is_space());
            stream.buffer.put(item);
            if *is_poll {
                let cons = stream.cons_desc().expect("polled stream lost its consumer");
                // Take the consumer's poll token; winning the swap makes
                // this producer the one that wakes the poller.
                if cons.task.poll_token.swap(false, Ordering::AcqRel) {
                    poll_wakeup = Some(cons);
                }
                *is_poll = false;
            }
        }

        // quasi V(n_sem)
        if stream.n_sem.fetch_add(1, Ordering::AcqRel) < 0 {
            // n_sem was -1: the consumer is blocked in read.
            let cons = stream
                .cons_desc()
                .expect("blocked stream lost its consumer");
            self.desc.task.unblock(&cons.task);
            if let Some(mon) = &self.desc.mon {
                mon.on_wakeup();
            }
        } else if let Some(cons) = poll_wakeup {
            // We are the sole producer waking the polling consumer.
            cons.task.set_wakeup(cons.clone());
            self.desc.task.unblock(&cons.task);
            if let Some(mon) = &self.desc.mon {
                mon.on_wakeup();
            }
        }

        if let Some(mon) = &self.desc.mon {
            mon.on_moved();
        }
    }

    /// Writes `item` unless the stream is full, in which case the item is
    /// handed back together with [`Error::WouldBlock`]. Never suspends.
    pub fn try_write(&mut self, item: T) -> core::result::Result<(), (Error, T)> {
        if !self.stream.buffer.is_space() {
            return Err((Error::WouldBlock, item));
        }
        self.write(item);
        Ok(())
    }
}

impl<T> Drop for StreamProd<T> {
    fn drop(&mut self) {
        if let Some(mon) = &self.desc.mon {
            mon.on_close();
        }
        debug!(
            "task {} closes stream {} for {:?}",
            self.desc.task.tid(),
            self.stream.uid,
            self.desc.mode
        );
        self.stream.detach_desc(&self.desc);
    }
}

/// The consumer end of a stream.
///
/// The handle is owned by the task that opened the stream for reading; it is
/// not clonable, which is what makes the single-consumer fast path of the
/// buffer sound. Dropping the handle closes the descriptor; the stream
/// itself is released with its last reference.
pub struct StreamCons<T> {
    desc: Arc<StreamDesc>,
    stream: Arc<Stream<T>>,
}

impl<T: Send> StreamCons<T> {
    /// The stream this descriptor reads from.
    pub fn stream(&self) -> &Arc<Stream<T>> {
        &self.stream
    }

    /// Reads the next item, suspending the task while the stream is empty.
    pub fn read(&mut self) -> T {
        let stream = &self.stream;
        if config::STREAM_DEBUG_LOG {
            log::trace!(
                "task {} reads from stream {}",
                self.desc.task.tid(),
                stream.uid
            );
        }

        // quasi P(n_sem)
        if stream.n_sem.fetch_sub(1, Ordering::AcqRel) == 0 {
            if let Some(mon) = &self.desc.mon {
                mon.on_block();
            }
            self.desc.task.block(BlockedOn::Input);
        }

        let item = stream
            .buffer
            .pop()
            .expect("woken consumer found an empty buffer");

        // quasi V(e_sem)
        if stream.e_sem.fetch_add(1, Ordering::AcqRel) < 0 {
            // e_sem was -1: the producer is blocked in write.
            let prod = stream
                .prod_desc()
                .expect("blocked stream lost its producer");
            self.desc.task.unblock(&prod.task);
            if let Some(mon) = &self.desc.mon {
                mon.on_wakeup();
            }
        }

        if let Some(mon) = &self.desc.mon {
            mon.on_moved();
        }
        item
    }

    /// Returns the next item without consuming it, or `None` on an empty
    /// stream. Never suspends.
    pub fn peek(&mut self) -> Option<&T> {
        self.stream.buffer.peek()
    }

    /// Rebinds this consumer to `stream`, releasing the stream read so far.
    /// Used to splice inputs.
    ///
    /// # Panics
    ///
    /// Panics when `stream` already has a consumer.
    pub fn replace(&mut self, stream: Arc<Stream<T>>) {
        stream.attach_desc(&self.desc);
        let old = core::mem::replace(&mut self.stream, stream);
        old.detach_desc(&self.desc);
        debug!(
            "task {} replaces stream {} with stream {}",
            self.desc.task.tid(),
            old.uid,
            self.stream.uid
        );
        if let Some(mon) = &self.desc.mon {
            mon.on_replace(self.stream.uid);
        }
        // The old stream is released here unless its producer still holds
        // a reference.
    }
}

impl<T> Drop for StreamCons<T> {
    fn drop(&mut self) {
        if let Some(mon) = &self.desc.mon {
            mon.on_close();
        }
        debug!(
            "task {} closes stream {} for {:?}",
            self.desc.task.tid(),
            self.stream.uid,
            self.desc.mode
        );
        self.stream.detach_desc(&self.desc);
    }
}
