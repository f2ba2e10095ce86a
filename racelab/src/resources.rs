//!
//! Resource graphs for the deadlock and reentrancy scenarios.
//!
//! ## ResourceGraph
//!
//! Two resource counters `a` and `b`, each guarded by its own lock slot.
//! Workers need both and take them in opposite orders. With two
//! independent non-reentrant locks that is a circular wait: once each
//! worker holds its first lock neither second acquire can ever succeed.
//! With one reentrant lock shared by both slots there is a single lock
//! identity, so the order no longer matters and the owner re-enters for its
//! nested acquire.
//!
//! ## NestedCounter
//!
//! An outer operation that calls an inner one, both taking the same
//! reentrant lock.
//!
//! ## ResourceManager
//!
//! One lock of either flavour around two resources, where
//! `update_resource_a` calls `update_both` while still holding the lock.
//! The plain lock times out on that nested acquire; the reentrant lock
//! does not.
//!

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use racelab_std_metrics::timed;
use racelab_std_sync::{Acquire, Lock, LockError, ReentrantLock};

fn hold_for(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOrder {
    AThenB,
    BThenA,
}

impl AcquireOrder {
    /// Alternates by worker index: even workers take A first.
    pub fn for_worker(index: usize) -> Self {
        if index % 2 == 0 {
            AcquireOrder::AThenB
        } else {
            AcquireOrder::BThenA
        }
    }
}

pub struct ResourceGraph<L: Acquire> {
    a: AtomicU64,
    b: AtomicU64,
    lock_a: Arc<L>,
    lock_b: Arc<L>,
    hold: Duration,
    rendezvous: Option<Barrier>,
}

impl ResourceGraph<Lock> {
    /// Two independent locks. Workers meet after taking their first lock,
    /// so every second acquire is attempted while both locks are held.
    pub fn independent(hold: Duration, workers: usize) -> Self {
        Self {
            a: AtomicU64::new(0),
            b: AtomicU64::new(0),
            lock_a: Arc::new(Lock::new()),
            lock_b: Arc::new(Lock::new()),
            hold,
            rendezvous: Some(Barrier::new(workers)),
        }
    }
}

impl ResourceGraph<ReentrantLock> {
    /// One reentrant lock standing in for both slots.
    pub fn shared(hold: Duration) -> Self {
        let lock = Arc::new(ReentrantLock::new());
        Self {
            a: AtomicU64::new(0),
            b: AtomicU64::new(0),
            lock_a: Arc::clone(&lock),
            lock_b: lock,
            hold,
            rendezvous: None,
        }
    }
}

impl<L: Acquire> ResourceGraph<L> {
    pub fn shares_one_lock(&self) -> bool {
        Arc::ptr_eq(&self.lock_a, &self.lock_b)
    }

    /// Takes both locks in `order`, then bumps both resources.
    pub fn update_both(&self, order: AcquireOrder) {
        let (first, second, names) = match order {
            AcquireOrder::AThenB => (&self.lock_a, &self.lock_b, ("A", "B")),
            AcquireOrder::BThenA => (&self.lock_b, &self.lock_a, ("B", "A")),
        };

        debug!("attempting to acquire lock {}", names.0);
        let _first = first.acquire();
        debug!("acquired lock {}", names.0);

        hold_for(self.hold);
        if let Some(rendezvous) = &self.rendezvous {
            rendezvous.wait();
        }

        debug!("attempting to acquire lock {}", names.1);
        let _second = second.acquire();
        debug!("acquired lock {}, processing with both locks", names.1);

        self.a.fetch_add(1, Ordering::Relaxed);
        self.b.fetch_add(1, Ordering::Relaxed);
    }

    pub fn values(&self) -> (u64, u64) {
        (self.a.load(Ordering::Acquire), self.b.load(Ordering::Acquire))
    }
}

#[derive(Debug)]
pub struct NestedCounter {
    lock: ReentrantLock,
    value: AtomicU64,
    timeout: Duration,
}

impl NestedCounter {
    pub fn new(timeout: Duration) -> Self {
        Self {
            lock: ReentrantLock::new(),
            value: AtomicU64::new(0),
            timeout,
        }
    }

    /// Takes the lock, bumps the value and calls `inner` while still
    /// holding it. Returns how long the nested acquire took.
    pub fn outer(&self) -> Result<Duration, LockError> {
        debug!("acquiring lock in outer");
        let _guard = self.lock.acquire_within(self.timeout).inspect_err(|err| {
            warn!(%err, "failed to acquire lock in outer");
        })?;
        self.value.fetch_add(1, Ordering::Relaxed);
        self.inner()
    }

    fn inner(&self) -> Result<Duration, LockError> {
        debug!("attempting to acquire lock in inner");
        let (guard, latency) = timed(|| self.lock.acquire_within(self.timeout));
        let _guard = guard.inspect_err(|err| {
            warn!(%err, "failed to acquire lock in inner");
        })?;
        self.value.fetch_add(1, Ordering::Relaxed);
        debug!(
            value = self.value.load(Ordering::Relaxed),
            depth = self.lock.depth(),
            "lock re-entered in inner"
        );
        Ok(latency)
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }
}

pub struct ResourceManager<L: Acquire> {
    lock: L,
    resource_a: AtomicU64,
    resource_b: AtomicU64,
    timeout: Duration,
    work: Duration,
}

impl<L: Acquire> ResourceManager<L> {
    pub fn new(lock: L, timeout: Duration, work: Duration) -> Self {
        Self {
            lock,
            resource_a: AtomicU64::new(0),
            resource_b: AtomicU64::new(0),
            timeout,
            work,
        }
    }

    fn enter(&self, purpose: &str) -> Result<L::Guard<'_>, LockError> {
        debug!(lock = %L::KIND, "acquiring lock for {}", purpose);
        let guard = self.lock.acquire_within(self.timeout).inspect_err(|err| {
            warn!(lock = %L::KIND, %err, "failed to acquire lock for {}", purpose);
        })?;
        debug!(lock = %L::KIND, "lock acquired for {}", purpose);
        Ok(guard)
    }

    /// Updates A, then calls `update_both_resources` with the lock held.
    pub fn update_resource_a(&self) -> Result<(), LockError> {
        let _guard = self.enter("resource A")?;
        self.resource_a.fetch_add(1, Ordering::Relaxed);
        hold_for(self.work);
        self.update_both_resources()
    }

    pub fn update_resource_b(&self) -> Result<(), LockError> {
        let _guard = self.enter("resource B")?;
        self.resource_b.fetch_add(1, Ordering::Relaxed);
        hold_for(self.work);
        Ok(())
    }

    pub fn update_both_resources(&self) -> Result<(), LockError> {
        let _guard = self.enter("both resources")?;
        self.resource_a.fetch_add(1, Ordering::Relaxed);
        self.resource_b.fetch_add(1, Ordering::Relaxed);
        hold_for(self.work);
        let (a, b) = self.values();
        info!(lock = %L::KIND, a, b, "resources updated");
        Ok(())
    }

    pub fn values(&self) -> (u64, u64) {
        (
            self.resource_a.load(Ordering::Acquire),
            self.resource_b.load(Ordering::Acquire),
        )
    }
}
