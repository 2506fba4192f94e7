// SPDX-License-Identifier: MPL-2.0

use static_assertions::const_assert;

/// Capacity of a stream created with size zero
/// (see [`Stream::with_capacity`](crate::Stream::with_capacity)).
pub const DEFAULT_STREAM_CAPACITY: usize = 16;

/// Whether to enable the trace log on the stream read/write/poll paths.
/// Per-item logs can overwhelm other logs, so disabled by default.
pub const STREAM_DEBUG_LOG: bool = false;

const_assert!(DEFAULT_STREAM_CAPACITY >= 1);
