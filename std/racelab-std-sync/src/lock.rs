//!
//! Non-reentrant Lock
//!
//! A flag behind a `Mutex` plus a `Condvar` to park waiters. The inner mutex
//! is only held for the few instructions that flip the flag, never across a
//! critical section, so waiting can be bounded with `Condvar::wait_timeout`.
//!
//! Usage:
//! ```
//! use racelab_std_sync::Lock;
//!
//! let lock = Lock::new();
//! {
//!     let _guard = lock.acquire();
//!     // critical section
//! }
//! assert!(!lock.is_locked());
//! ```
//!

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::LockError;

#[derive(Debug, Default)]
pub struct Lock {
    held: Mutex<bool>,
    released: Condvar,
}

/// Proof of holding a `Lock`. Dropping it is the only way to release.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct LockGuard<'a> {
    lock: &'a Lock,
}

impl Lock {
    pub const fn new() -> Self {
        Self {
            held: Mutex::new(false),
            released: Condvar::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, bool> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until the lock is free. Calling this while already holding the
    /// lock never returns.
    pub fn acquire(&self) -> LockGuard<'_> {
        let mut held = self.state();
        while *held {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *held = true;
        trace!("lock acquired");
        LockGuard { lock: self }
    }

    pub fn acquire_within(&self, timeout: Duration) -> Result<LockGuard<'_>, LockError> {
        let deadline = Instant::now() + timeout;
        let mut held = self.state();
        while *held {
            let now = Instant::now();
            if now >= deadline {
                trace!(?timeout, "lock acquisition timed out");
                return Err(LockError::Timeout { waited: timeout });
            }
            let (next, _) = self
                .released
                .wait_timeout(held, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            held = next;
        }
        *held = true;
        trace!("lock acquired");
        Ok(LockGuard { lock: self })
    }

    pub fn try_acquire(&self) -> Option<LockGuard<'_>> {
        let mut held = self.state();
        if *held {
            return None;
        }
        *held = true;
        Some(LockGuard { lock: self })
    }

    /// Runs `f` with the lock held.
    pub fn with<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.acquire();
        f()
    }

    pub fn is_locked(&self) -> bool {
        *self.state()
    }

    fn release(&self) {
        let mut held = self.state();
        *held = false;
        drop(held);
        self.released.notify_all();
        trace!("lock released");
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::thread;

    #[test]
    fn test_lock_basic() {
        let lock = Lock::new();
        assert!(!lock.is_locked());

        let guard = lock.acquire();
        assert!(lock.is_locked());
        assert!(lock.try_acquire().is_none());

        drop(guard);
        assert!(!lock.is_locked());
        assert!(lock.try_acquire().is_some());
    }

    #[test]
    fn test_lock_concurrent() {
        let lock = Arc::new(Lock::new());
        let value = Arc::new(AtomicU64::new(0));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let value = Arc::clone(&value);
                thread::spawn(move || {
                    for _ in 0..100 {
                        let _guard = lock.acquire();
                        let current = value.load(Ordering::Relaxed);
                        thread::yield_now();
                        value.store(current + 1, Ordering::Relaxed);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(value.load(Ordering::Relaxed), 1000);
    }

    #[test]
    fn test_self_acquire_times_out() {
        let lock = Lock::new();
        let _guard = lock.acquire();

        let start = Instant::now();
        let err = lock.acquire_within(Duration::from_millis(50)).unwrap_err();
        assert_eq!(
            err,
            LockError::Timeout {
                waited: Duration::from_millis(50)
            }
        );
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_acquire_within_succeeds_after_release() {
        let lock = Arc::new(Lock::new());
        let guard = lock.acquire();

        let waiter = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || lock.acquire_within(Duration::from_secs(5)).is_ok())
        };

        thread::sleep(Duration::from_millis(20));
        drop(guard);
        assert!(waiter.join().unwrap());
    }

    fn fail_inside_section() {
        panic!("failure inside critical section");
    }

    #[test]
    fn test_release_on_unwind() {
        let lock = Lock::new();

        let result = panic::catch_unwind(AssertUnwindSafe(|| lock.with(fail_inside_section)));

        assert!(result.is_err());
        assert!(!lock.is_locked());
    }
}
