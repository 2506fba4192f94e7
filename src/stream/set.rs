// SPDX-License-Identifier: MPL-2.0

//! Sets of consumer descriptors and the poll protocol.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::{StreamCons, StreamUid};
use crate::task::{BlockedOn, Task};

/// An ordered, rotatable set of consumer descriptors owned by one task.
///
/// [`StreamSet::poll`] treats the set as a cycle: once a poll returns, the
/// next traversal starts right after the descriptor that woke the consumer,
/// so repeated polls make progress on every stream of the set.
pub struct StreamSet<T> {
    entries: VecDeque<StreamCons<T>>,
}

impl<T: Send> StreamSet<T> {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Appends `cons` to the traversal order.
    pub fn add(&mut self, cons: StreamCons<T>) {
        self.entries.push_back(cons);
    }

    /// Removes and returns the descriptor reading the stream with `uid`.
    pub fn remove(&mut self, uid: StreamUid) -> Option<StreamCons<T>> {
        let pos = self
            .entries
            .iter()
            .position(|entry| entry.stream.uid == uid)?;
        self.entries.remove(pos)
    }

    /// The number of descriptors in the set.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The descriptors in traversal order.
    pub fn iter(&self) -> impl Iterator<Item = &StreamCons<T>> {
        self.entries.iter()
    }

    /// Waits for an item on any stream of the set and returns the
    /// descriptor that has one.
    ///
    /// While every stream of the set is empty the task suspends with
    /// [`BlockedOn::AnyIn`]. Exactly one agent claims the task's poll token
    /// and thereby names the wakeup descriptor: either the scan below, upon
    /// finding a non-empty stream, or the one producer that wins the claim
    /// while writing to a registered stream. The set must not change between
    /// entering this method and its return; the exclusive borrow enforces
    /// that as long as the set stays on the polling task.
    ///
    /// # Panics
    ///
    /// Panics when the set is empty or when a descriptor of the set is not
    /// owned by the current task.
    pub fn poll(&mut self) -> &mut StreamCons<T> {
        assert!(!self.entries.is_empty(), "cannot poll an empty set");
        let task = Task::current();
        debug_assert!(
            self.entries
                .iter()
                .all(|entry| Arc::ptr_eq(&entry.desc.task, &task)),
            "a set is polled only by the task owning its descriptors"
        );

        // Place the poll token.
        task.poll_token.store(true, Ordering::Release);

        let mut self_served = false;
        let mut registered = 0;
        for entry in &self.entries {
            let stream = &entry.stream;
            let mut is_poll = stream.is_poll.lock();
            if stream.buffer.has_item() {
                // Data is there; determine whether a producer beat us to
                // the token. If so, it has also named the wakeup
                // descriptor, which must not be overwritten.
                if task.poll_token.swap(false, Ordering::AcqRel) {
                    self_served = true;
                    task.set_wakeup(entry.desc.clone());
                }
                break;
            }
            // Nothing buffered: register this stream as a waker.
            *is_poll = true;
            registered += 1;
        }

        if !self_served {
            task.block(BlockedOn::AnyIn);
        }
        debug_assert!(!task.poll_token.load(Ordering::Acquire));

        // Unregister the streams marked above. A producer may already have
        // cleared some of the flags; clearing them again is harmless.
        // Without this pass, a producer could observe a stale flag long
        // after this poll, when the consumer may have closed the stream,
        // and chase a detached consumer descriptor.
        for entry in self.entries.iter().take(registered) {
            *entry.stream.is_poll.lock() = false;
        }

        let wakeup = task
            .take_wakeup()
            .expect("poll returned without a wakeup descriptor");
        let pos = self
            .entries
            .iter()
            .position(|entry| Arc::ptr_eq(&entry.desc, &wakeup))
            .expect("wakeup descriptor is not part of the polled set");

        // Rotate so the next traversal starts right after the wakeup
        // descriptor, which moves to the back.
        self.entries.rotate_left((pos + 1) % self.entries.len());
        self.entries.back_mut().unwrap()
    }
}

impl<T: Send> Default for StreamSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for StreamSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|entry| entry.stream.uid))
            .finish()
    }
}
