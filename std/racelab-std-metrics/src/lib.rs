//!
//! racelab-std-metrics - Timing Utilities
//!
//! Monotonic timing for scenario reports: total run duration and the
//! latency of individual lock acquisitions.
//!
//! ## Example
//!
//! ```
//! use racelab_std_metrics::Stopwatch;
//!
//! let watch = Stopwatch::start();
//! // ... work ...
//! println!("Execution time: {:.2} seconds", watch.elapsed().as_secs_f64());
//! ```
//!

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left until `budget` has passed since the start, zero once spent.
    pub fn remaining(&self, budget: Duration) -> Duration {
        budget.saturating_sub(self.elapsed())
    }
}

/// Runs `f` and returns its result with how long it took.
pub fn timed<T>(f: impl FnOnce() -> T) -> (T, Duration) {
    let watch = Stopwatch::start();
    let value = f();
    (value, watch.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_elapsed_monotonic() {
        let watch = Stopwatch::start();
        let t1 = watch.elapsed();
        thread::sleep(Duration::from_millis(1));
        let t2 = watch.elapsed();
        assert!(t2 > t1);
    }

    #[test]
    fn test_remaining_saturates() {
        let watch = Stopwatch::start();
        thread::sleep(Duration::from_millis(5));
        assert_eq!(watch.remaining(Duration::from_millis(1)), Duration::ZERO);
        assert!(watch.remaining(Duration::from_secs(60)) > Duration::from_secs(50));
    }

    #[test]
    fn test_timed() {
        let (value, took) = timed(|| {
            thread::sleep(Duration::from_millis(2));
            7
        });
        assert_eq!(value, 7);
        assert!(took >= Duration::from_millis(2));
    }
}
