// SPDX-License-Identifier: MPL-2.0

//! The stream and task primitives of Weft, a lightweight parallel execution
//! layer.
//!
//! A stream is the unidirectional communication and synchronization channel
//! between two tasks. A task that wants to use a stream opens it for reading
//! (as the one consumer) or for writing (as the one producer) and moves items
//! through the obtained descriptor; items travel in FIFO order over a
//! lock-free bounded buffer. Reading from an empty stream and writing to a
//! full stream suspend the calling task until the peer catches up, and a
//! consumer can wait for data on any stream of a [`StreamSet`] with
//! [`StreamSet::poll`].

extern crate static_assertions;

pub mod config;
mod error;
pub mod monitor;
pub mod prelude;
pub mod stream;
pub mod sync;
pub mod task;

pub use self::{
    error::Error,
    prelude::Result,
    stream::{Mode, Stream, StreamCons, StreamProd, StreamSet, StreamUid},
    task::{BlockedOn, Task, TaskOptions, TaskStatus},
};
