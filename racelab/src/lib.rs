///
/// racelab - A concurrency sandbox
///
/// Exhibits data races, lock discipline and deadlock under controlled,
/// reproducible conditions, and reports what was expected next to what was
/// observed.
///
/// - counter: Shared counter with unguarded and guarded increments
/// - account: Accounts with optional per-account locks and the fee batch
/// - resources: Resource graphs for deadlock and reentrancy
/// - harness: Worker threads joined with a bounded timeout
/// - report: Expected vs. observed values and the run verdict
/// - scenario: The scenario catalogue tying the pieces together
///
/// Entry point:
/// - `run_scenario`: Build a target, run workers against it, return a `Report`
///

pub mod account;
pub mod config;
pub mod counter;
pub mod errors;
pub mod harness;
pub mod money;
pub mod report;
pub mod resources;
pub mod scenario;

pub use config::{Config, Overrides};
pub use errors::{AccountError, ConfigError, HarnessError, RacelabError, ScenarioError};
pub use harness::{Harness, Liveness, RunOutcome, WorkerContext};
pub use money::Money;
pub use report::{Observation, Report, Verdict};
pub use scenario::{Scenario, run_scenario};
