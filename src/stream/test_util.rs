// SPDX-License-Identifier: MPL-2.0

//! Shared fixtures for the stream tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::monitor::{StreamMonitor, TaskMonitor};
use crate::stream::{Mode, StreamUid};
use crate::task::{BlockedOn, Task, TaskOptions, TaskStatus};

/// Spawns an unmonitored task and panics if spawning fails.
pub(crate) fn spawn(func: impl FnOnce() + Send + 'static) -> Arc<Task> {
    TaskOptions::new(func).spawn().unwrap()
}

/// Spawns a task whose stream events are counted by `mon`.
pub(crate) fn spawn_monitored(
    mon: Arc<CountingMonitor>,
    func: impl FnOnce() + Send + 'static,
) -> Arc<Task> {
    TaskOptions::new(func).monitor(mon).spawn().unwrap()
}

/// Busy-waits for `cond` with a deadline, so a protocol bug fails the test
/// instead of hanging it.
pub(crate) fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting until {what}");
        std::thread::yield_now();
    }
}

pub(crate) fn wait_blocked(task: &Arc<Task>, on: BlockedOn) {
    wait_until("the task blocks", || {
        task.status() == TaskStatus::Blocked(on)
    });
}

/// Stream events observed over every descriptor opened by a task.
#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) blocks: AtomicUsize,
    pub(crate) wakeups: AtomicUsize,
    pub(crate) moved: AtomicUsize,
    pub(crate) closes: AtomicUsize,
    pub(crate) replaces: AtomicUsize,
}

/// A [`TaskMonitor`] that funnels the events of all opened descriptors into
/// one shared set of [`Counters`].
pub(crate) struct CountingMonitor {
    counts: Arc<Counters>,
}

impl CountingMonitor {
    pub(crate) fn new() -> (Arc<Self>, Arc<Counters>) {
        let counts = Arc::new(Counters::default());
        let mon = Arc::new(Self {
            counts: counts.clone(),
        });
        (mon, counts)
    }
}

impl TaskMonitor for CountingMonitor {
    fn stream_open(&self, _uid: StreamUid, _mode: Mode) -> Option<Box<dyn StreamMonitor>> {
        Some(Box::new(CountingStreamMonitor {
            counts: self.counts.clone(),
        }))
    }
}

struct CountingStreamMonitor {
    counts: Arc<Counters>,
}

impl StreamMonitor for CountingStreamMonitor {
    fn on_close(&self) {
        self.counts.closes.fetch_add(1, Ordering::Relaxed);
    }

    fn on_replace(&self, _new_uid: StreamUid) {
        self.counts.replaces.fetch_add(1, Ordering::Relaxed);
    }

    fn on_block(&self) {
        self.counts.blocks.fetch_add(1, Ordering::Relaxed);
    }

    fn on_wakeup(&self) {
        self.counts.wakeups.fetch_add(1, Ordering::Relaxed);
    }

    fn on_moved(&self) {
        self.counts.moved.fetch_add(1, Ordering::Relaxed);
    }
}
