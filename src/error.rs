// SPDX-License-Identifier: MPL-2.0

/// The error type which is returned from the APIs of this crate.
///
/// Misusing a stream (writing through a read descriptor, opening a direction
/// twice, polling an empty set) is a bug in the host runtime and panics
/// instead of surfacing here; the variants below cover the conditions a
/// well-behaved caller can run into.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Error {
    /// The operation could not complete without suspending the task.
    WouldBlock,
    /// The host ran out of resources while spawning a task.
    NotEnoughResources,
}
