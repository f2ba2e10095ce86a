///
/// # Configuration
///
/// Scenario parameters come from three layers, later ones winning:
/// built-in defaults, an optional `racelab.toml`, and command-line flags.
/// Every field has a default, so a file only needs the values it changes.
///
/// ## Example racelab.toml
///
/// ```toml
/// [harness]
/// timeout_ms = 3000
/// seed = 42
///
/// [counter]
/// workers = 2
/// iterations = 100000
/// jitter_probability = 0.000001
/// jitter_pause_us = 1
///
/// [bank]
/// accounts = 50
/// initial_balance = 1000.0
/// amount = 14.95
/// delay_ms = 50
///
/// [deadlock]
/// hold_ms = 500
///
/// [reentrant]
/// acquire_timeout_ms = 1000
/// work_ms = 100
/// ```
///
/// Durations are plain integers with the unit in the key name.
///

use std::path::Path;
use std::time::Duration;

use clap::Args;
use serde::{Deserialize, Serialize};

use racelab_std_random::Jitter;

use crate::errors::ConfigError;
use crate::money::Money;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub harness: HarnessConfig,
    pub counter: CounterConfig,
    pub bank: BankConfig,
    pub deadlock: DeadlockConfig,
    pub reentrant: ReentrantConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Bounded wait for all workers before a run is declared stuck.
    pub timeout_ms: u64,
    /// Seeds the per-worker jitter generators; unset draws from the OS.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CounterConfig {
    pub workers: usize,
    pub iterations: u64,
    pub jitter_probability: f64,
    pub jitter_pause_us: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BankConfig {
    pub accounts: usize,
    pub initial_balance: f64,
    pub amount: f64,
    /// Simulated work between reading and writing a balance.
    pub delay_ms: u64,
    /// Even-numbered workers charge, odd-numbered workers reimburse.
    pub workers: usize,
    /// Passes each worker makes over all accounts.
    pub rounds: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeadlockConfig {
    /// How long a worker holds its first lock before reaching for the second.
    pub hold_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReentrantConfig {
    /// Bound on each nested acquisition.
    pub acquire_timeout_ms: u64,
    /// Simulated work while holding the lock.
    pub work_ms: u64,
    pub workers: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 3_000,
            seed: None,
        }
    }
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            iterations: 100_000,
            jitter_probability: 0.000_001,
            jitter_pause_us: 1,
        }
    }
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            accounts: 50,
            initial_balance: 1000.0,
            amount: 14.95,
            delay_ms: 50,
            workers: 2,
            rounds: 1,
        }
    }
}

impl Default for DeadlockConfig {
    fn default() -> Self {
        Self { hold_ms: 500 }
    }
}

impl Default for ReentrantConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: 1_000,
            work_ms: 100,
            workers: 1,
        }
    }
}

impl HarnessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl CounterConfig {
    pub fn jitter(&self) -> Jitter {
        Jitter::new(
            self.jitter_probability,
            Duration::from_micros(self.jitter_pause_us),
        )
    }
}

impl BankConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn initial(&self) -> Result<Money, ConfigError> {
        money_field("bank.initial_balance", self.initial_balance)
    }

    pub fn fee(&self) -> Result<Money, ConfigError> {
        money_field("bank.amount", self.amount)
    }

    /// Largest total one account can be charged: every charging worker's
    /// withdrawals landing before any reimbursement. `None` on overflow.
    pub fn worst_case_charges(&self) -> Result<Option<Money>, ConfigError> {
        let fee = self.fee()?.cents();
        let chargers = i64::try_from(self.workers.div_ceil(2)).ok();
        let rounds = i64::try_from(self.rounds).ok();
        Ok(chargers
            .zip(rounds)
            .and_then(|(chargers, rounds)| fee.checked_mul(chargers)?.checked_mul(rounds))
            .map(Money::from_cents))
    }

    /// Join timeout for a bank run: `base` on top of the time the locked
    /// pipeline needs to push every worker through every account.
    pub fn join_budget(&self, base: Duration) -> Duration {
        let steps = (self.accounts as u64)
            .saturating_mul(self.rounds)
            .saturating_add(self.workers as u64);
        base.saturating_add(Duration::from_millis(steps.saturating_mul(self.delay_ms)))
    }
}

impl DeadlockConfig {
    pub fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }
}

impl ReentrantConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn work(&self) -> Duration {
        Duration::from_millis(self.work_ms)
    }

    /// Join timeout for a reentrancy run: `base` plus one bounded nested
    /// acquire and the two stretches of work inside the critical section.
    pub fn join_budget(&self, base: Duration) -> Duration {
        base.saturating_add(self.acquire_timeout())
            .saturating_add(self.work().saturating_mul(2))
    }
}

fn money_field(name: &str, value: f64) -> Result<Money, ConfigError> {
    match Money::from_f64(value) {
        Some(money) if !money.is_negative() => Ok(money),
        _ => Err(ConfigError::Invalid(format!(
            "{} must be a finite, non-negative amount (got {})",
            name, value
        ))),
    }
}

/// Command-line overrides. Each flag applies to every section that has a
/// matching knob.
#[derive(Debug, Clone, Default, Args)]
pub struct Overrides {
    /// Worker threads for counter, bank and reentrance scenarios
    #[arg(long)]
    pub workers: Option<usize>,

    /// Counter increments per worker
    #[arg(long)]
    pub iterations: Option<u64>,

    /// Passes each bank worker makes over all accounts
    #[arg(long)]
    pub rounds: Option<u64>,

    /// Delay inside critical sections in milliseconds (bank delay, deadlock hold, reentrant work)
    #[arg(long)]
    pub delay_ms: Option<u64>,

    /// Join timeout in milliseconds before a run is declared stuck
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Number of bank accounts
    #[arg(long)]
    pub accounts: Option<usize>,

    /// Probability of pausing inside a counter increment
    #[arg(long)]
    pub jitter_probability: Option<f64>,

    /// Seed for reproducible jitter
    #[arg(long)]
    pub seed: Option<u64>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Defaults when `path` is `None`, otherwise the file.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(workers) = overrides.workers {
            self.counter.workers = workers;
            self.bank.workers = workers;
            self.reentrant.workers = workers;
        }
        if let Some(iterations) = overrides.iterations {
            self.counter.iterations = iterations;
        }
        if let Some(rounds) = overrides.rounds {
            self.bank.rounds = rounds;
        }
        if let Some(delay_ms) = overrides.delay_ms {
            self.bank.delay_ms = delay_ms;
            self.deadlock.hold_ms = delay_ms;
            self.reentrant.work_ms = delay_ms;
        }
        if let Some(timeout_ms) = overrides.timeout_ms {
            self.harness.timeout_ms = timeout_ms;
        }
        if let Some(accounts) = overrides.accounts {
            self.bank.accounts = accounts;
        }
        if let Some(probability) = overrides.jitter_probability {
            self.counter.jitter_probability = probability;
        }
        if let Some(seed) = overrides.seed {
            self.harness.seed = Some(seed);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.harness.timeout_ms == 0 {
            return Err(invalid("harness.timeout_ms must be greater than 0"));
        }
        if self.counter.workers == 0 {
            return Err(invalid("counter.workers must be at least 1"));
        }
        if self.counter.iterations == 0 {
            return Err(invalid("counter.iterations must be at least 1"));
        }
        let total = (self.counter.workers as u64)
            .checked_mul(self.counter.iterations)
            .filter(|total| i64::try_from(*total).is_ok());
        if total.is_none() {
            return Err(invalid(
                "counter.workers * counter.iterations is too large to count",
            ));
        }
        let p = self.counter.jitter_probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(ConfigError::Invalid(format!(
                "counter.jitter_probability must be within [0, 1] (got {})",
                p
            )));
        }
        if self.bank.accounts == 0 {
            return Err(invalid("bank.accounts must be at least 1"));
        }
        if self.bank.workers == 0 {
            return Err(invalid("bank.workers must be at least 1"));
        }
        if self.bank.rounds == 0 {
            return Err(invalid("bank.rounds must be at least 1"));
        }
        let initial = self.bank.initial()?;
        match self.bank.worst_case_charges()? {
            Some(charges) if charges <= initial => {}
            Some(charges) => {
                return Err(ConfigError::Invalid(format!(
                    "bank charges of up to {} per account can overdraw the initial balance of {}",
                    charges, initial
                )));
            }
            None => return Err(invalid("bank.amount * bank.rounds is too large")),
        }
        if self.reentrant.workers == 0 {
            return Err(invalid("reentrant.workers must be at least 1"));
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.counter.workers, 2);
        assert_eq!(config.counter.iterations, 100_000);
        assert_eq!(config.bank.accounts, 50);
        assert_eq!(config.bank.fee().unwrap(), Money::from_cents(1495));
        assert_eq!(config.harness.timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
[counter]
workers = 8

[harness]
seed = 9
"#,
        )
        .unwrap();
        assert_eq!(config.counter.workers, 8);
        assert_eq!(config.counter.iterations, 100_000);
        assert_eq!(config.harness.seed, Some(9));
        assert_eq!(config.bank, BankConfig::default());
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let err = Config::from_toml_str("[counter]\nthreads = 4\n").unwrap_err();
        assert!(err.to_string().contains("threads"));
    }

    #[test]
    fn test_overrides_apply_to_every_section() {
        let mut config = Config::default();
        config.apply(&Overrides {
            workers: Some(4),
            iterations: Some(10),
            rounds: Some(3),
            delay_ms: Some(2),
            timeout_ms: Some(500),
            accounts: Some(5),
            jitter_probability: Some(0.5),
            seed: Some(1),
        });
        assert_eq!(config.counter.workers, 4);
        assert_eq!(config.bank.workers, 4);
        assert_eq!(config.reentrant.workers, 4);
        assert_eq!(config.counter.iterations, 10);
        assert_eq!(config.bank.rounds, 3);
        assert_eq!(config.bank.delay_ms, 2);
        assert_eq!(config.deadlock.hold_ms, 2);
        assert_eq!(config.reentrant.work_ms, 2);
        assert_eq!(config.harness.timeout_ms, 500);
        assert_eq!(config.bank.accounts, 5);
        assert_eq!(config.counter.jitter_probability, 0.5);
        assert_eq!(config.harness.seed, Some(1));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();
        config.counter.workers = 0;
        assert!(config.validate().unwrap_err().to_string().contains("counter.workers"));

        let mut config = Config::default();
        config.counter.jitter_probability = 1.5;
        assert!(config.validate().unwrap_err().to_string().contains("jitter_probability"));

        let mut config = Config::default();
        config.bank.amount = -1.0;
        assert!(config.validate().unwrap_err().to_string().contains("bank.amount"));

        let mut config = Config::default();
        config.harness.timeout_ms = 0;
        assert!(config.validate().unwrap_err().to_string().contains("timeout_ms"));

        let mut config = Config::default();
        config.counter.workers = 3;
        config.counter.iterations = u64::MAX / 2;
        assert!(config.validate().unwrap_err().to_string().contains("too large"));

        let mut config = Config::default();
        config.bank.rounds = u64::MAX;
        assert!(config.validate().unwrap_err().to_string().contains("too large"));
    }

    #[test]
    fn test_charges_that_can_overdraw_are_rejected() {
        let mut config = Config::default();
        config.bank.workers = 1;
        config.bank.rounds = 100;
        config.bank.accounts = 2;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("overdraw"), "{}", err);
        assert!(err.contains("1495.00"));

        // 66 passes of 14.95 still fit in 1000.00.
        config.bank.rounds = 66;
        assert!(config.validate().is_ok());

        // Three workers means two chargers.
        let mut config = Config::default();
        config.bank.workers = 3;
        config.bank.rounds = 34;
        assert!(config.validate().is_err());
        config.bank.rounds = 33;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_join_budgets_cover_the_expected_work() {
        let base = Duration::from_secs(3);

        let bank = BankConfig::default();
        // (50 accounts * 1 round + 2 workers) * 50 ms on top of the base
        assert_eq!(bank.join_budget(base), base + Duration::from_millis(2_600));

        let reentrant = ReentrantConfig::default();
        // 1 s nested acquire bound plus 2 * 100 ms of work
        assert_eq!(reentrant.join_budget(base), base + Duration::from_millis(1_200));

        // A nested acquire bound close to the base timeout still fits.
        let reentrant = ReentrantConfig {
            acquire_timeout_ms: 2_900,
            ..ReentrantConfig::default()
        };
        assert!(reentrant.join_budget(base) > base + reentrant.acquire_timeout() + reentrant.work());

        let huge = BankConfig {
            rounds: u64::MAX,
            ..BankConfig::default()
        };
        assert_eq!(huge.join_budget(base), base + Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_toml_round_trip_of_effective_config() {
        let mut config = Config::default();
        config.harness.seed = Some(3);
        let text = config.to_toml().unwrap();
        assert!(text.contains("[bank]"));
        assert_eq!(Config::from_toml_str(&text).unwrap(), config);
    }
}
