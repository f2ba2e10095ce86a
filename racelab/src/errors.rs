///
/// racelab error types.
///
/// Only failures of the tool itself live here: unreadable config, a worker
/// that could not be spawned, an operation refused by an account. Lost
/// updates, lock timeouts inside a scenario and stuck workers are results
/// and travel on the `Report` instead.
///

use std::io;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::money::Money;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config at {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AccountError {
    #[error("Insufficient balance: {balance} available, {amount} requested")]
    InsufficientFunds { balance: Money, amount: Money },
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Failed to spawn worker {index}: {source}")]
    Spawn {
        index: usize,
        #[source]
        source: io::Error,
    },
}

/// Anything that stops a scenario from producing a report.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Harness(#[from] HarnessError),
}

/// Top-level error reported by the `racelab` binary.
#[derive(Debug, Error, Diagnostic)]
pub enum RacelabError {
    #[error(transparent)]
    #[diagnostic(
        code(racelab::config),
        help("run `racelab config` to see the effective settings")
    )]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(code(racelab::harness), help("try fewer workers"))]
    Harness(#[from] HarnessError),

    #[error("Failed to render report: {0}")]
    #[diagnostic(code(racelab::report))]
    Render(#[from] serde_json::Error),
}

impl From<ScenarioError> for RacelabError {
    fn from(err: ScenarioError) -> Self {
        match err {
            ScenarioError::Config(err) => RacelabError::Config(err),
            ScenarioError::Harness(err) => RacelabError::Harness(err),
        }
    }
}
