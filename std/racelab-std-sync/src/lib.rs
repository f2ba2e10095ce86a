//!
//! racelab-std-sync - Lock Primitives
//!
//! Mutual exclusion primitives used by the racelab scenarios. None of them
//! wrap data: they guard a critical section whose state lives elsewhere, so
//! the same read-modify-write can be run with and without a lock around it.
//!
//! ## Lock
//!
//! Non-reentrant. A second `acquire` from the holding thread blocks on
//! itself; `acquire_within` bounds that wait and reports `LockError::Timeout`.
//!
//! ## ReentrantLock
//!
//! Tracks the owning thread and an acquisition depth:
//! - `Free --acquire(T)--> Held(T, 1)`
//! - `Held(T, n) --acquire(T)--> Held(T, n + 1)`
//! - `Held(T, n) --release--> Held(T, n - 1)` while `n > 1`
//! - `Held(T, 1) --release--> Free`
//! - `Held(T, n) --acquire(U)--> blocks until Free`
//!
//! ## Guards
//!
//! Release only happens through guard drop, so a lock can never be released
//! by a thread that did not acquire it, and unwinding out of a critical
//! section still releases.
//!

pub mod error;
pub mod lock;
pub mod reentrant;

pub use error::LockError;
pub use lock::{Lock, LockGuard};
pub use reentrant::{ReentrantGuard, ReentrantLock};

use std::fmt;
use std::time::Duration;

/// Which flavour of lock a scenario was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKind {
    Lock,
    Reentrant,
}

impl LockKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LockKind::Lock => "Lock",
            LockKind::Reentrant => "RLock",
        }
    }
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common acquisition surface so an operation can be written once and run
/// against either lock flavour.
pub trait Acquire: Send + Sync {
    type Guard<'a>
    where
        Self: 'a;

    const KIND: LockKind;

    /// Blocks until the lock is held by the calling thread.
    fn acquire(&self) -> Self::Guard<'_>;

    /// Like `acquire`, but gives up after `timeout`.
    fn acquire_within(&self, timeout: Duration) -> Result<Self::Guard<'_>, LockError>;
}

impl Acquire for Lock {
    type Guard<'a> = LockGuard<'a>;

    const KIND: LockKind = LockKind::Lock;

    fn acquire(&self) -> LockGuard<'_> {
        Lock::acquire(self)
    }

    fn acquire_within(&self, timeout: Duration) -> Result<LockGuard<'_>, LockError> {
        Lock::acquire_within(self, timeout)
    }
}

impl Acquire for ReentrantLock {
    type Guard<'a> = ReentrantGuard<'a>;

    const KIND: LockKind = LockKind::Reentrant;

    fn acquire(&self) -> ReentrantGuard<'_> {
        ReentrantLock::acquire(self)
    }

    fn acquire_within(&self, timeout: Duration) -> Result<ReentrantGuard<'_>, LockError> {
        ReentrantLock::acquire_within(self, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested_within<L: Acquire>(lock: &L, timeout: Duration) -> Result<(), LockError> {
        let _outer = lock.acquire();
        let _inner = lock.acquire_within(timeout)?;
        Ok(())
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(<Lock as Acquire>::KIND.to_string(), "Lock");
        assert_eq!(<ReentrantLock as Acquire>::KIND.to_string(), "RLock");
    }

    #[test]
    fn test_nested_acquire_through_trait() {
        let timeout = Duration::from_millis(50);

        let plain = Lock::new();
        assert!(matches!(
            nested_within(&plain, timeout),
            Err(LockError::Timeout { .. })
        ));
        assert!(!plain.is_locked(), "outer guard must still release");

        let reentrant = ReentrantLock::new();
        assert!(nested_within(&reentrant, timeout).is_ok());
        assert!(!reentrant.is_locked());
    }
}
