//!
//! Worker Harness
//!
//! Spawns a fixed number of OS threads against one shared target, releases
//! them together through a start gate, and waits for them with a bounded
//! timeout. There is no way to cancel a thread blocked on a lock, so a
//! worker still running when the timeout expires is detached and reported
//! as stuck; the harness itself always returns.
//!
//! Completion is signalled over a channel by a drop guard inside each
//! worker, so a worker that panics still reports in and is not mistaken for
//! a stuck one.
//!

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use serde::{Serialize, Serializer};
use tracing::{debug, warn};

use racelab_std_metrics::Stopwatch;
use racelab_std_random::{WorkerRng, worker_rng};

use crate::errors::HarnessError;

/// State handed to each worker invocation.
pub struct WorkerContext {
    pub index: usize,
    pub rng: WorkerRng,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Liveness {
    Completed,
    /// Suspected deadlock: workers were still alive when the wait ran out.
    StillRunningAfterTimeout {
        stuck: usize,
        #[serde(serialize_with = "serialize_secs")]
        timeout: Duration,
    },
}

impl Liveness {
    pub fn is_completed(&self) -> bool {
        matches!(self, Liveness::Completed)
    }

    /// Combines two sequential runs; stuck workers add up.
    pub fn and(self, other: Liveness) -> Liveness {
        match (self, other) {
            (Liveness::Completed, other) => other,
            (this, Liveness::Completed) => this,
            (
                Liveness::StillRunningAfterTimeout { stuck, timeout },
                Liveness::StillRunningAfterTimeout {
                    stuck: more,
                    timeout: other_timeout,
                },
            ) => Liveness::StillRunningAfterTimeout {
                stuck: stuck + more,
                timeout: timeout.max(other_timeout),
            },
        }
    }
}

pub(crate) fn serialize_secs<S: Serializer>(
    duration: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub workers: usize,
    pub liveness: Liveness,
    pub panicked: usize,
    pub elapsed: Duration,
}

impl RunOutcome {
    pub fn completed(&self) -> bool {
        self.liveness.is_completed()
    }

    pub fn stuck(&self) -> usize {
        match self.liveness {
            Liveness::Completed => 0,
            Liveness::StillRunningAfterTimeout { stuck, .. } => stuck,
        }
    }
}

/// Holds workers until every thread has been spawned.
#[derive(Default)]
struct StartGate {
    state: Mutex<Option<bool>>,
    opened: Condvar,
}

impl StartGate {
    fn open(&self, proceed: bool) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = Some(proceed);
        self.opened.notify_all();
    }

    /// Blocks until opened; false means the run was abandoned.
    fn wait(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(proceed) = *state {
                return proceed;
            }
            state = self
                .opened
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

struct DoneSignal {
    index: usize,
    done: Sender<usize>,
}

impl Drop for DoneSignal {
    fn drop(&mut self) {
        let _ = self.done.send(self.index);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Harness {
    timeout: Duration,
    seed: Option<u64>,
}

impl Harness {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `work` once on each of `workers` threads and waits up to the
    /// configured timeout for all of them.
    pub fn run<F>(&self, workers: usize, work: F) -> Result<RunOutcome, HarnessError>
    where
        F: Fn(&mut WorkerContext) + Send + Sync + 'static,
    {
        let work = Arc::new(work);
        let gate = Arc::new(StartGate::default());
        let (done_tx, done_rx) = mpsc::channel();
        let mut handles = Vec::with_capacity(workers);

        for index in 0..workers {
            let work = Arc::clone(&work);
            let worker_gate = Arc::clone(&gate);
            let signal = DoneSignal {
                index,
                done: done_tx.clone(),
            };
            let seed = self.seed;

            let spawned = thread::Builder::new()
                .name(format!("worker-{}", index + 1))
                .spawn(move || {
                    let _signal = signal;
                    if !worker_gate.wait() {
                        return;
                    }
                    let mut ctx = WorkerContext {
                        index,
                        rng: worker_rng(seed, index),
                    };
                    debug!("worker starting");
                    work(&mut ctx);
                    debug!("worker finished");
                });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    gate.open(false);
                    return Err(HarnessError::Spawn { index, source });
                }
            }
        }
        drop(done_tx);

        let watch = Stopwatch::start();
        gate.open(true);

        let mut finished = vec![false; workers];
        let mut remaining = workers;
        while remaining > 0 {
            let left = watch.remaining(self.timeout);
            if left.is_zero() {
                break;
            }
            match done_rx.recv_timeout(left) {
                Ok(index) => {
                    finished[index] = true;
                    remaining -= 1;
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        let elapsed = watch.elapsed();

        let mut panicked = 0;
        for (handle, done) in handles.into_iter().zip(&finished) {
            // Stuck workers are detached by dropping their handle.
            if *done && handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            warn!(panicked, "workers panicked");
        }

        let liveness = if remaining == 0 {
            Liveness::Completed
        } else {
            warn!(
                stuck = remaining,
                timeout = ?self.timeout,
                "workers still running after timeout, suspected deadlock"
            );
            Liveness::StillRunningAfterTimeout {
                stuck: remaining,
                timeout: self.timeout,
            }
        };

        Ok(RunOutcome {
            workers,
            liveness,
            panicked,
            elapsed,
        })
    }
}
