//!
//! Reentrant Lock
//!
//! Owner thread identity plus an acquisition depth, both behind one internal
//! `Mutex`. The owning thread re-enters without waiting; every other thread
//! parks on the `Condvar` until the depth returns to zero and ownership is
//! cleared.
//!
//! Guards are `!Send`: a release always happens on the thread that
//! acquired.
//!

use std::marker::PhantomData;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::LockError;

#[derive(Debug, Default)]
struct Ownership {
    owner: Option<ThreadId>,
    depth: usize,
}

impl Ownership {
    /// Takes or re-enters the lock for `me` if possible.
    fn enter(&mut self, me: ThreadId) -> bool {
        match self.owner {
            None => {
                self.owner = Some(me);
                self.depth = 1;
                true
            }
            Some(owner) if owner == me => {
                self.depth += 1;
                true
            }
            Some(_) => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct ReentrantLock {
    state: Mutex<Ownership>,
    released: Condvar,
}

#[must_use = "the acquisition is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ReentrantGuard<'a> {
    lock: &'a ReentrantLock,
    _not_send: PhantomData<*const ()>,
}

impl ReentrantLock {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(Ownership {
                owner: None,
                depth: 0,
            }),
            released: Condvar::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, Ownership> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn guard(&self) -> ReentrantGuard<'_> {
        ReentrantGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    pub fn acquire(&self) -> ReentrantGuard<'_> {
        let me = thread::current().id();
        let mut state = self.state();
        while !state.enter(me) {
            state = self
                .released
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        trace!(depth = state.depth, "reentrant lock acquired");
        self.guard()
    }

    pub fn acquire_within(&self, timeout: Duration) -> Result<ReentrantGuard<'_>, LockError> {
        let me = thread::current().id();
        let deadline = Instant::now() + timeout;
        let mut state = self.state();
        while !state.enter(me) {
            let now = Instant::now();
            if now >= deadline {
                trace!(?timeout, "reentrant lock acquisition timed out");
                return Err(LockError::Timeout { waited: timeout });
            }
            let (next, _) = self
                .released
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }
        trace!(depth = state.depth, "reentrant lock acquired");
        Ok(self.guard())
    }

    pub fn try_acquire(&self) -> Option<ReentrantGuard<'_>> {
        let me = thread::current().id();
        let mut state = self.state();
        if state.enter(me) {
            Some(self.guard())
        } else {
            None
        }
    }

    /// Current acquisition depth; zero when free.
    pub fn depth(&self) -> usize {
        self.state().depth
    }

    pub fn is_locked(&self) -> bool {
        self.state().owner.is_some()
    }

    fn release(&self) {
        let mut state = self.state();
        debug_assert_eq!(state.owner, Some(thread::current().id()));
        state.depth = state.depth.saturating_sub(1);
        if state.depth > 0 {
            trace!(depth = state.depth, "reentrant lock released one level");
            return;
        }
        state.owner = None;
        drop(state);
        self.released.notify_all();
        trace!("reentrant lock free");
    }
}

impl Drop for ReentrantGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
