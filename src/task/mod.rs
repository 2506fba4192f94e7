// SPDX-License-Identifier: MPL-2.0

//! Tasks and the block/unblock protocol.
//!
//! The stream layer relies on three capabilities of a task: identifying the
//! current task ([`Task::current`]), suspending it ([`Task::block`]) and
//! making it runnable again ([`Task::unblock`]). In this crate every task is
//! hosted on its own OS thread, so blocking parks the hosting thread; a
//! scheduler multiplexing many tasks over a worker pool would replace this
//! module and leave the stream layer untouched.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use log::debug;
use spin::Once;

use crate::config;
use crate::monitor::{StreamMonitor, TaskMonitor};
use crate::prelude::*;
use crate::stream::{Mode, StreamDesc, StreamUid};
use crate::sync::SpinLock;

static TASK_SEQ: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static CURRENT: RefCell<Option<Arc<Task>>> = const { RefCell::new(None) };
}

/// What a blocked task is waiting for.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BlockedOn {
    /// A read from an empty stream.
    Input,
    /// A write to a full stream.
    Output,
    /// A poll over a set of streams that were all empty.
    AnyIn,
}

/// The status of a task.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TaskStatus {
    /// The task is running or ready to run.
    Running,
    /// The task is suspended on a stream operation.
    Blocked(BlockedOn),
    /// The task function has returned.
    Exited,
}

/// A task hosted by the execution layer.
///
/// Peers hold tasks through `Arc` and wake them with [`Task::unblock`]; the
/// stream layer additionally uses the poll token and the wakeup-descriptor
/// slot to arbitrate multi-stream polls.
pub struct Task {
    tid: u64,
    name: Option<String>,
    status: SpinLock<TaskStatus>,
    /// One-shot wake permit: set by `unblock`, consumed by `block`. An
    /// unblock that races ahead of the matching block is not lost.
    woken: AtomicBool,
    /// The hosting thread, filled in once the task starts running.
    thread: Once<thread::Thread>,
    join: SpinLock<Option<thread::JoinHandle<()>>>,
    mon: Option<Arc<dyn TaskMonitor>>,

    /// Armed by a poll of this task, claimed by whichever agent wakes it.
    pub(crate) poll_token: AtomicBool,
    /// The descriptor that ended the poll, published by the token winner.
    pub(crate) wakeup_sd: SpinLock<Option<Arc<StreamDesc>>>,
}

impl Task {
    /// Returns the task calling this function.
    ///
    /// # Panics
    ///
    /// Panics when the calling thread does not host a task.
    pub fn current() -> Arc<Task> {
        CURRENT
            .with(|current| current.borrow().clone())
            .expect("no current task on this thread")
    }

    /// The process-unique id of this task.
    pub fn tid(&self) -> u64 {
        self.tid
    }

    /// The name given at spawn time, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the task status.
    pub fn status(&self) -> TaskStatus {
        *self.status.lock()
    }

    /// Suspends this task until a peer calls [`Task::unblock`] on it.
    ///
    /// A wake permit published before this call is consumed immediately, so
    /// an unblock racing ahead of the block is never lost; one unblock
    /// releases exactly one block.
    ///
    /// # Panics
    ///
    /// Panics when called by a task other than `self`.
    pub fn block(self: &Arc<Self>, reason: BlockedOn) {
        assert!(
            Arc::ptr_eq(self, &Task::current()),
            "a task can only block itself"
        );
        if config::STREAM_DEBUG_LOG {
            log::trace!("task {} blocks on {:?}", self.tid, reason);
        }
        *self.status.lock() = TaskStatus::Blocked(reason);
        while !self.woken.swap(false, Ordering::Acquire) {
            thread::park();
        }
        *self.status.lock() = TaskStatus::Running;
    }

    /// Makes `target` runnable again; the calling task keeps running.
    pub fn unblock(self: &Arc<Self>, target: &Arc<Task>) {
        if config::STREAM_DEBUG_LOG {
            log::trace!("task {} unblocks task {}", self.tid, target.tid);
        }
        let had_permit = target.woken.swap(true, Ordering::Release);
        debug_assert!(!had_permit, "a task received two wakeups for one block");
        if let Some(thread) = target.thread.get() {
            thread.unpark();
        }
    }

    /// Waits until the task function has returned.
    ///
    /// A panic that ended the task resurfaces here.
    pub fn join(&self) {
        let handle = self.join.lock().take();
        if let Some(handle) = handle {
            if let Err(payload) = handle.join() {
                std::panic::resume_unwind(payload);
            }
        }
    }

    pub(crate) fn open_monitor(
        &self,
        uid: StreamUid,
        mode: Mode,
    ) -> Option<Box<dyn StreamMonitor>> {
        self.mon.as_ref().and_then(|mon| mon.stream_open(uid, mode))
    }

    pub(crate) fn set_wakeup(&self, sd: Arc<StreamDesc>) {
        *self.wakeup_sd.lock() = Some(sd);
    }

    pub(crate) fn take_wakeup(&self) -> Option<Arc<StreamDesc>> {
        self.wakeup_sd.lock().take()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Task")
            .field("tid", &self.tid)
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}

/// Options to create and spawn a new task.
pub struct TaskOptions {
    func: Box<dyn FnOnce() + Send>,
    name: Option<String>,
    mon: Option<Arc<dyn TaskMonitor>>,
}

impl TaskOptions {
    /// Creates a set of options for a task executing `func`.
    pub fn new<F>(func: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            func: Box::new(func),
            name: None,
            mon: None,
        }
    }

    /// Sets a human-readable name for the task.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attaches a monitor consulted whenever the task opens a stream.
    pub fn monitor(mut self, mon: Arc<dyn TaskMonitor>) -> Self {
        self.mon = Some(mon);
        self
    }

    /// Spawns the task on a fresh hosting thread.
    pub fn spawn(self) -> Result<Arc<Task>> {
        let task = Arc::new(Task {
            tid: TASK_SEQ.fetch_add(1, Ordering::Relaxed),
            name: self.name,
            status: SpinLock::new(TaskStatus::Running),
            woken: AtomicBool::new(false),
            thread: Once::new(),
            join: SpinLock::new(None),
            mon: self.mon,
            poll_token: AtomicBool::new(false),
            wakeup_sd: SpinLock::new(None),
        });

        let mut builder = thread::Builder::new();
        if let Some(name) = &task.name {
            builder = builder.name(name.clone());
        }

        let func = self.func;
        let hosted = task.clone();
        let handle = builder
            .spawn(move || {
                hosted.thread.call_once(thread::current);
                CURRENT.with(|current| *current.borrow_mut() = Some(hosted.clone()));
                debug!("task {} starts", hosted.tid);

                func();

                *hosted.status.lock() = TaskStatus::Exited;
                debug!("task {} exits", hosted.tid);
                CURRENT.with(|current| current.borrow_mut().take());
            })
            .map_err(|_| Error::NotEnoughResources)?;
        *task.join.lock() = Some(handle);

        Ok(task)
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use super::*;

    fn wait_until(what: &str, cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting until {what}");
            thread::yield_now();
        }
    }

    #[test]
    fn spawn_runs_the_task() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let task = TaskOptions::new(move || flag.store(true, Ordering::Relaxed))
            .name("runner")
            .spawn()
            .unwrap();
        task.join();
        assert!(ran.load(Ordering::Relaxed));
        assert_eq!(task.name(), Some("runner"));
        assert_eq!(task.status(), TaskStatus::Exited);
    }

    #[test]
    fn current_returns_the_hosted_task() {
        let observed = Arc::new(SpinLock::new(None));
        let slot = observed.clone();
        let task = TaskOptions::new(move || {
            let current = Task::current();
            assert!(Arc::ptr_eq(&current, &Task::current()));
            *slot.lock() = Some(current.tid());
        })
        .spawn()
        .unwrap();
        task.join();
        assert_eq!(*observed.lock(), Some(task.tid()));
    }

    #[test]
    fn unblock_wakes_a_blocked_task() {
        let blocker = TaskOptions::new(|| {
            Task::current().block(BlockedOn::Output);
        })
        .spawn()
        .unwrap();

        wait_until("the task blocks", || {
            blocker.status() == TaskStatus::Blocked(BlockedOn::Output)
        });

        let target = blocker.clone();
        let waker = TaskOptions::new(move || {
            Task::current().unblock(&target);
        })
        .spawn()
        .unwrap();

        waker.join();
        blocker.join();
    }

    #[test]
    fn unblock_before_block_is_not_lost() {
        let go = Arc::new(AtomicBool::new(false));

        let gate = go.clone();
        let blocker = TaskOptions::new(move || {
            while !gate.load(Ordering::Acquire) {
                thread::yield_now();
            }
            // The permit is already there; this must return immediately.
            Task::current().block(BlockedOn::Input);
        })
        .spawn()
        .unwrap();

        let target = blocker.clone();
        let gate = go.clone();
        let waker = TaskOptions::new(move || {
            Task::current().unblock(&target);
            gate.store(true, Ordering::Release);
        })
        .spawn()
        .unwrap();

        waker.join();
        blocker.join();
        assert_eq!(blocker.status(), TaskStatus::Exited);
    }

    #[test]
    #[should_panic(expected = "no current task")]
    fn current_panics_off_task() {
        let _ = Task::current();
    }
}
