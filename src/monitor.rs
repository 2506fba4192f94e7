// SPDX-License-Identifier: MPL-2.0

//! Monitoring hooks for streams.
//!
//! A task may carry a [`TaskMonitor`]; whenever the task opens a stream, the
//! monitor decides whether the new descriptor is observed by returning a
//! [`StreamMonitor`] for it. The hooks are notifications only and have no
//! effect on stream semantics; a task without a monitor pays nothing.

use crate::stream::{Mode, StreamUid};

/// Per-task monitoring, consulted when the task opens a stream.
pub trait TaskMonitor: Send + Sync {
    /// Called when the owning task opens a stream. Returning `None` leaves
    /// the new descriptor unobserved.
    fn stream_open(&self, uid: StreamUid, mode: Mode) -> Option<Box<dyn StreamMonitor>>;
}

/// Per-descriptor monitoring callbacks.
///
/// Every hook defaults to a no-op, so implementors override only the events
/// they care about.
pub trait StreamMonitor: Send + Sync {
    /// The descriptor is being closed.
    fn on_close(&self) {}

    /// The consumer descriptor was rebound to the stream with `new_uid`.
    fn on_replace(&self, _new_uid: StreamUid) {}

    /// The owning task is about to suspend on this descriptor.
    fn on_block(&self) {}

    /// The peer task was woken through this descriptor.
    fn on_wakeup(&self) {}

    /// An item moved over this descriptor.
    fn on_moved(&self) {}
}
