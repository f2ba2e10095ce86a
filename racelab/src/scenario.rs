//!
//! Scenario catalogue.
//!
//! Each scenario builds a fresh target from the config, hands it to the
//! harness and turns what is left afterwards into a `Report`. Targets are
//! owned by the scenario run and shared with workers through an `Arc`, so
//! runs never see each other's state.
//!

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use clap::ValueEnum;
use serde::Serialize;
use tracing::{info, info_span};

use racelab_std_sync::{Acquire, Lock, LockKind, ReentrantLock};

use crate::account::Bank;
use crate::config::Config;
use crate::counter::{CounterMode, SharedCounter};
use crate::errors::{HarnessError, ScenarioError};
use crate::harness::{Harness, RunOutcome};
use crate::money::Money;
use crate::report::{Layout, Observation, Report};
use crate::resources::{AcquireOrder, NestedCounter, ResourceGraph, ResourceManager};

/// Balances per row in the bank grid.
const GRID_COLUMNS: usize = 5;

/// The deadlock needs exactly one worker per acquisition order.
const DEADLOCK_WORKERS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    CounterRace,
    CounterGuarded,
    CounterGuardedScoped,
    BankUnguarded,
    BankGuarded,
    Deadlock,
    DeadlockAvoided,
    Reentrance,
    LockVsReentrant,
}

impl Scenario {
    pub const ALL: [Scenario; 9] = [
        Scenario::CounterRace,
        Scenario::CounterGuarded,
        Scenario::CounterGuardedScoped,
        Scenario::BankUnguarded,
        Scenario::BankGuarded,
        Scenario::Deadlock,
        Scenario::DeadlockAvoided,
        Scenario::Reentrance,
        Scenario::LockVsReentrant,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Scenario::CounterRace => "counter-race",
            Scenario::CounterGuarded => "counter-guarded",
            Scenario::CounterGuardedScoped => "counter-guarded-scoped",
            Scenario::BankUnguarded => "bank-unguarded",
            Scenario::BankGuarded => "bank-guarded",
            Scenario::Deadlock => "deadlock",
            Scenario::DeadlockAvoided => "deadlock-avoided",
            Scenario::Reentrance => "reentrance",
            Scenario::LockVsReentrant => "lock-vs-reentrant",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Scenario::CounterRace => "Unguarded counter race",
            Scenario::CounterGuarded => "Guarded counter",
            Scenario::CounterGuardedScoped => "Guarded counter (scoped closure)",
            Scenario::BankUnguarded => "Bank fees without account locks",
            Scenario::BankGuarded => "Bank fees with per-account locks",
            Scenario::Deadlock => "Deadlock with opposite lock order",
            Scenario::DeadlockAvoided => "Deadlock avoided with one reentrant lock",
            Scenario::Reentrance => "Reentrant lock self-acquisition",
            Scenario::LockVsReentrant => "Lock vs. reentrant lock",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Scenario::CounterRace => {
                "workers increment a shared counter without a lock; updates get lost"
            }
            Scenario::CounterGuarded => {
                "the same increments under an explicit lock guard; always exact"
            }
            Scenario::CounterGuardedScoped => {
                "the same increments as a closure run under the lock; always exact"
            }
            Scenario::BankUnguarded => {
                "fees charged and reimbursed concurrently with no locks; balances drift"
            }
            Scenario::BankGuarded => {
                "fees charged and reimbursed under per-account locks; balances restored"
            }
            Scenario::Deadlock => {
                "two workers take two locks in opposite order and never finish"
            }
            Scenario::DeadlockAvoided => {
                "the same nested acquisitions through one shared reentrant lock"
            }
            Scenario::Reentrance => "an outer call re-acquires the reentrant lock it holds",
            Scenario::LockVsReentrant => {
                "a nested acquire times out on a plain lock and succeeds on a reentrant one"
            }
        }
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Runs one scenario to completion or timeout.
///
/// The config is validated first; scenario outcomes, including deadlocks
/// and lost updates, come back inside the `Report`.
pub fn run_scenario(config: &Config, scenario: Scenario) -> Result<Report, ScenarioError> {
    config.validate()?;
    let harness = Harness::new(join_timeout(config, scenario)).with_seed(config.harness.seed);

    let _span = info_span!("scenario", name = scenario.name()).entered();
    info!("starting scenario");

    let report = match scenario {
        Scenario::CounterRace => run_counter(&harness, config, CounterMode::Unguarded)?,
        Scenario::CounterGuarded => run_counter(&harness, config, CounterMode::Guarded)?,
        Scenario::CounterGuardedScoped => run_counter(&harness, config, CounterMode::Scoped)?,
        Scenario::BankUnguarded => run_bank(&harness, config, false)?,
        Scenario::BankGuarded => run_bank(&harness, config, true)?,
        Scenario::Deadlock => run_deadlock(&harness, config)?,
        Scenario::DeadlockAvoided => run_deadlock_avoided(&harness, config)?,
        Scenario::Reentrance => run_reentrance(&harness, config)?,
        Scenario::LockVsReentrant => run_lock_vs_reentrant(&harness, config)?,
    };

    info!(
        verdict = ?report.verdict,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "scenario finished"
    );
    Ok(report)
}

/// Bounded wait for a scenario's workers. Scenarios whose critical sections
/// sleep get the configured timeout on top of the time that work takes, so a
/// slow but correct run is never mistaken for a stuck one.
pub fn join_timeout(config: &Config, scenario: Scenario) -> Duration {
    let base = config.harness.timeout();
    match scenario {
        Scenario::BankUnguarded | Scenario::BankGuarded => config.bank.join_budget(base),
        Scenario::Reentrance | Scenario::LockVsReentrant => config.reentrant.join_budget(base),
        _ => base,
    }
}

fn run_counter(
    harness: &Harness,
    config: &Config,
    mode: CounterMode,
) -> Result<Report, HarnessError> {
    let scenario = match mode {
        CounterMode::Unguarded => Scenario::CounterRace,
        CounterMode::Guarded => Scenario::CounterGuarded,
        CounterMode::Scoped => Scenario::CounterGuardedScoped,
    };
    let workers = config.counter.workers;
    let iterations = config.counter.iterations;
    let jitter = config.counter.jitter();
    let counter = Arc::new(SharedCounter::new(jitter));

    let outcome = {
        let counter = Arc::clone(&counter);
        harness.run(workers, move |ctx| {
            for _ in 0..iterations {
                counter.increment_with(mode, &mut ctx.rng);
            }
        })?
    };

    let expected = (workers as u64).saturating_mul(iterations);
    Ok(Report::new(scenario, &outcome)
        .observe(Observation::count(
            "Final counter value",
            expected,
            counter.value(),
        ))
        .note(format!(
            "{} workers x {} increments, jitter probability {} with {:?} pauses",
            workers,
            iterations,
            jitter.probability(),
            jitter.pause()
        )))
}

/// Net fee a single account carries after every worker has made its passes.
/// Even-numbered workers charge and odd-numbered ones reimburse. Validation
/// keeps the worst-case charge within the initial balance, so no withdrawal
/// is refused and the arithmetic stays in range.
fn expected_balance(initial: Money, fee: Money, workers: usize, rounds: u64) -> Money {
    let charges = workers.div_ceil(2) as i64;
    let reimbursements = (workers / 2) as i64;
    initial - fee * ((charges - reimbursements) * rounds as i64)
}

fn run_bank(harness: &Harness, config: &Config, guarded: bool) -> Result<Report, ScenarioError> {
    let scenario = if guarded {
        Scenario::BankGuarded
    } else {
        Scenario::BankUnguarded
    };
    let bank_config = &config.bank;
    let initial = bank_config.initial()?;
    let fee = bank_config.fee()?;
    let rounds = bank_config.rounds;
    let bank = Arc::new(Bank::new(
        bank_config.accounts,
        initial,
        guarded,
        bank_config.delay(),
    ));

    let outcome = {
        let bank = Arc::clone(&bank);
        harness.run(bank_config.workers, move |ctx| {
            for _ in 0..rounds {
                if ctx.index % 2 == 0 {
                    bank.charge_fees(fee);
                } else {
                    bank.reimburse_fees(fee);
                }
            }
        })?
    };

    let expected = expected_balance(initial, fee, bank_config.workers, rounds);
    let balances = bank
        .balances()
        .into_iter()
        .enumerate()
        .map(|(i, actual)| Observation::money(format!("Account {}", i + 1), expected, actual));

    Ok(Report::new(scenario, &outcome)
        .observe_all(balances)
        .observe(Observation::failed_operations(
            "Refused withdrawals",
            0,
            bank.refused(),
        ))
        .with_layout(Layout::Grid {
            columns: GRID_COLUMNS,
        }))
}

fn graph_report<L: Acquire + 'static>(
    scenario: Scenario,
    graph: &ResourceGraph<L>,
    outcome: &RunOutcome,
) -> Report {
    let (a, b) = graph.values();
    let expected = outcome.workers as u64;
    Report::new(scenario, outcome)
        .observe(Observation::count("Resource A", expected, a))
        .observe(Observation::count("Resource B", expected, b))
}

fn run_graph<L: Acquire + 'static>(
    harness: &Harness,
    graph: Arc<ResourceGraph<L>>,
) -> Result<RunOutcome, HarnessError> {
    harness.run(DEADLOCK_WORKERS, move |ctx| {
        graph.update_both(AcquireOrder::for_worker(ctx.index));
    })
}

fn run_deadlock(harness: &Harness, config: &Config) -> Result<Report, HarnessError> {
    let graph = Arc::new(ResourceGraph::independent(
        config.deadlock.hold(),
        DEADLOCK_WORKERS,
    ));
    let outcome = run_graph(harness, Arc::clone(&graph))?;
    Ok(graph_report(Scenario::Deadlock, &graph, &outcome)
        .note("worker 1 takes A then B, worker 2 takes B then A, each with its own plain lock"))
}

fn run_deadlock_avoided(harness: &Harness, config: &Config) -> Result<Report, HarnessError> {
    let graph = Arc::new(ResourceGraph::shared(config.deadlock.hold()));
    let outcome = run_graph(harness, Arc::clone(&graph))?;
    Ok(graph_report(Scenario::DeadlockAvoided, &graph, &outcome)
        .note("both acquisition orders go through one reentrant lock"))
}

/// Keeps the slowest latency seen by any worker.
#[derive(Default)]
struct MaxLatency(AtomicU64);

impl MaxLatency {
    fn record(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.0.fetch_max(micros, Ordering::Relaxed);
    }

    fn get(&self) -> Duration {
        Duration::from_micros(self.0.load(Ordering::Relaxed))
    }
}

fn run_reentrance(harness: &Harness, config: &Config) -> Result<Report, HarnessError> {
    let workers = config.reentrant.workers;
    let counter = Arc::new(NestedCounter::new(config.reentrant.acquire_timeout()));
    let timeouts = Arc::new(AtomicUsize::new(0));
    let latency = Arc::new(MaxLatency::default());

    let outcome = {
        let counter = Arc::clone(&counter);
        let timeouts = Arc::clone(&timeouts);
        let latency = Arc::clone(&latency);
        harness.run(workers, move |_| match counter.outer() {
            Ok(inner) => latency.record(inner),
            Err(_) => {
                timeouts.fetch_add(1, Ordering::Relaxed);
            }
        })?
    };

    Ok(Report::new(Scenario::Reentrance, &outcome)
        .observe(Observation::count(
            "Final value",
            2 * workers as u64,
            counter.value(),
        ))
        .observe(Observation::lock_timeouts(
            "Lock acquisition timeouts",
            0,
            timeouts.load(Ordering::Relaxed),
        ))
        .note(format!(
            "slowest inner re-acquire took {:?}",
            latency.get()
        )))
}

struct ManagerRun {
    outcome: RunOutcome,
    values: (u64, u64),
    timeouts: usize,
}

fn run_manager<L: Acquire + 'static>(
    harness: &Harness,
    lock: L,
    config: &Config,
) -> Result<ManagerRun, HarnessError> {
    let manager = Arc::new(ResourceManager::new(
        lock,
        config.reentrant.acquire_timeout(),
        config.reentrant.work(),
    ));
    let timeouts = Arc::new(AtomicUsize::new(0));

    let outcome = {
        let manager = Arc::clone(&manager);
        let timeouts = Arc::clone(&timeouts);
        harness.run(1, move |_| {
            if manager.update_resource_a().is_err() {
                timeouts.fetch_add(1, Ordering::Relaxed);
            }
        })?
    };

    Ok(ManagerRun {
        outcome,
        values: manager.values(),
        timeouts: timeouts.load(Ordering::Relaxed),
    })
}

fn manager_observations(kind: LockKind, run: &ManagerRun) -> [Observation; 3] {
    // A plain lock gives up on the nested acquire, so only the outer bump
    // of A lands.
    let (expected, expected_timeouts) = match kind {
        LockKind::Lock => ((1, 0), 1),
        LockKind::Reentrant => ((2, 1), 0),
    };
    [
        Observation::count(format!("{}: resource A", kind), expected.0, run.values.0),
        Observation::count(format!("{}: resource B", kind), expected.1, run.values.1),
        Observation::lock_timeouts(
            format!("{}: nested acquire timeouts", kind),
            expected_timeouts,
            run.timeouts,
        ),
    ]
}

fn run_lock_vs_reentrant(harness: &Harness, config: &Config) -> Result<Report, HarnessError> {
    let plain = run_manager(harness, Lock::new(), config)?;
    let reentrant = run_manager(harness, ReentrantLock::new(), config)?;

    Ok(Report::new(Scenario::LockVsReentrant, &plain.outcome)
        .merge_run(&reentrant.outcome)
        .observe_all(manager_observations(LockKind::Lock, &plain))
        .observe_all(manager_observations(LockKind::Reentrant, &reentrant))
        .note(format!(
            "{} run took {:.2}s including the {:?} nested acquire timeout",
            LockKind::Lock,
            plain.outcome.elapsed.as_secs_f64(),
            config.reentrant.acquire_timeout()
        ))
        .note(format!(
            "{} run took {:.2}s",
            LockKind::Reentrant,
            reentrant.outcome.elapsed.as_secs_f64()
        )))
}
