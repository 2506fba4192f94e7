// SPDX-License-Identifier: MPL-2.0

mod spin;

pub use self::spin::{SpinLock, SpinLockGuard};

cfg_if::cfg_if! {
    if #[cfg(feature = "poll-spinlock")] {
        /// The lock guarding the producer side of a stream: the poll flag
        /// and the atomicity of put-item-then-check-poll.
        ///
        /// The critical sections under this lock are a handful of
        /// instructions, so the `poll-spinlock` feature trades the default
        /// OS mutex for a spinning lock.
        pub(crate) struct ProdLock<T>(SpinLock<T>);

        impl<T> ProdLock<T> {
            pub(crate) fn new(val: T) -> Self {
                Self(SpinLock::new(val))
            }

            pub(crate) fn lock(&self) -> SpinLockGuard<'_, T> {
                self.0.lock()
            }
        }
    } else {
        use std::sync::{Mutex, MutexGuard};

        /// The lock guarding the producer side of a stream: the poll flag
        /// and the atomicity of put-item-then-check-poll.
        ///
        /// Backed by an OS mutex; the `poll-spinlock` feature swaps in
        /// [`SpinLock`] instead.
        pub(crate) struct ProdLock<T>(Mutex<T>);

        impl<T> ProdLock<T> {
            pub(crate) fn new(val: T) -> Self {
                Self(Mutex::new(val))
            }

            pub(crate) fn lock(&self) -> MutexGuard<'_, T> {
                // A peer that panicked while holding the lock must not turn
                // this acquisition into a second panic site.
                self.0.lock().unwrap_or_else(|e| e.into_inner())
            }
        }
    }
}
