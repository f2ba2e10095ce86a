//!
//! Shared Counter
//!
//! An integer accumulator incremented by concurrent workers. The increment
//! is deliberately split into a load, an optional jitter pause and a store,
//! so two workers can read the same value and one increment is lost. The
//! value is an atomic only so the lost update is a well-defined outcome
//! rather than undefined behaviour; no read-modify-write instruction is
//! used.
//!
//! Three ways to increment:
//! - `increment`: unguarded, may lose updates
//! - `increment_guarded`: explicit guard held across the read-modify-write
//! - `increment_scoped`: the same, written as a closure under `Lock::with`
//!

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use racelab_std_random::{Jitter, WorkerRng};
use racelab_std_sync::Lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CounterMode {
    Unguarded,
    Guarded,
    Scoped,
}

#[derive(Debug, Default)]
pub struct SharedCounter {
    value: AtomicU64,
    lock: Lock,
    jitter: Jitter,
}

impl SharedCounter {
    pub fn new(jitter: Jitter) -> Self {
        Self {
            value: AtomicU64::new(0),
            lock: Lock::new(),
            jitter,
        }
    }

    pub fn increment(&self, rng: &mut WorkerRng) {
        let current = self.value.load(Ordering::Relaxed);
        self.jitter.maybe_pause(rng);
        self.value.store(current + 1, Ordering::Relaxed);
    }

    pub fn increment_guarded(&self, rng: &mut WorkerRng) {
        let _guard = self.lock.acquire();
        self.increment(rng);
    }

    pub fn increment_scoped(&self, rng: &mut WorkerRng) {
        self.lock.with(|| self.increment(rng));
    }

    pub fn increment_with(&self, mode: CounterMode, rng: &mut WorkerRng) {
        match mode {
            CounterMode::Unguarded => self.increment(rng),
            CounterMode::Guarded => self.increment_guarded(rng),
            CounterMode::Scoped => self.increment_scoped(rng),
        }
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use racelab_std_random::worker_rng;
    use std::sync::Arc;
    use std::thread;

    fn hammer(counter: &Arc<SharedCounter>, mode: CounterMode, workers: usize, iterations: u64) {
        let handles: Vec<_> = (0..workers)
            .map(|index| {
                let counter = Arc::clone(counter);
                thread::spawn(move || {
                    let mut rng = worker_rng(Some(11), index);
                    for _ in 0..iterations {
                        counter.increment_with(mode, &mut rng);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_single_thread_unguarded_is_exact() {
        let counter = SharedCounter::new(Jitter::none());
        let mut rng = worker_rng(Some(1), 0);
        for _ in 0..1000 {
            counter.increment(&mut rng);
        }
        assert_eq!(counter.value(), 1000);
    }

    #[test]
    fn test_guarded_modes_are_exact() {
        for mode in [CounterMode::Guarded, CounterMode::Scoped] {
            let counter = Arc::new(SharedCounter::new(Jitter::new(
                0.01,
                std::time::Duration::ZERO,
            )));
            hammer(&counter, mode, 4, 5_000);
            assert_eq!(counter.value(), 20_000, "{:?} lost updates", mode);
        }
    }

    #[test]
    fn test_unguarded_never_exceeds_total() {
        let counter = Arc::new(SharedCounter::new(Jitter::new(
            0.01,
            std::time::Duration::ZERO,
        )));
        hammer(&counter, CounterMode::Unguarded, 4, 5_000);
        assert!(counter.value() <= 20_000);
        assert!(counter.value() > 0);
    }
}
