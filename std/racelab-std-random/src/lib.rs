//!
//! racelab-std-random - Randomized Delay Injection
//!
//! A race window is the gap between reading shared state and writing the
//! updated value back. `Jitter` pauses inside that gap with a configurable
//! probability so interleavings that are rare on their own show up within a
//! few runs.
//!
//! ## Pauses
//!
//! - A non-zero pause sleeps the calling thread.
//! - A zero pause yields instead, which still hands the CPU to a competing
//!   worker on a single core.
//!
//! ## Generators
//!
//! Each worker owns a `SmallRng`. With a seed, worker `n` of a run always
//! draws the same sequence, so a trial can be replayed; without one the
//! generators are seeded from the OS.
//!

use std::thread;
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Per-worker generator handed to scenario operations.
pub type WorkerRng = SmallRng;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Jitter {
    probability: f64,
    pause: Duration,
}

impl Default for Jitter {
    fn default() -> Self {
        Self::none()
    }
}

impl Jitter {
    /// Never pauses.
    pub const fn none() -> Self {
        Self {
            probability: 0.0,
            pause: Duration::ZERO,
        }
    }

    /// Pauses with the given probability; values outside `[0, 1]` are clamped.
    pub fn new(probability: f64, pause: Duration) -> Self {
        let probability = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        Self { probability, pause }
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    pub fn pause(&self) -> Duration {
        self.pause
    }

    pub fn is_active(&self) -> bool {
        self.probability > 0.0
    }

    /// Rolls the dice and pauses on a hit. Returns whether it paused.
    pub fn maybe_pause<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        if !self.is_active() {
            return false;
        }
        if self.probability < 1.0 && !rng.gen_bool(self.probability) {
            return false;
        }
        pause_for(self.pause);
        true
    }
}

/// Sleeps for `duration`, or yields when it is zero.
pub fn pause_for(duration: Duration) {
    if duration.is_zero() {
        thread::yield_now();
    } else {
        thread::sleep(duration);
    }
}

/// Generator for worker `worker` of a run.
pub fn worker_rng(seed: Option<u64>, worker: usize) -> WorkerRng {
    match seed {
        Some(seed) => SmallRng::seed_from_u64(mix(seed, worker as u64)),
        None => SmallRng::from_entropy(),
    }
}

/// splitmix64 finalizer over seed and worker index.
fn mix(seed: u64, worker: u64) -> u64 {
    let mut z = seed ^ worker.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
