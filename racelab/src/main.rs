///
/// racelab CLI
///
/// - racelab run <scenario>: Run a scenario and print its report
/// - racelab check <scenario>: Run a scenario, exit 0 only if it matched
/// - racelab list: Show the available scenarios
/// - racelab config: Print the effective configuration
///

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::Level;

use racelab::{Config, Overrides, RacelabError, Scenario, run_scenario};

#[derive(Parser)]
#[command(name = "racelab")]
#[command(author, version, about = "Reproducible races, locks and deadlocks", long_about = None)]
struct Cli {
    /// Path to a racelab.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario and print its report
    Run {
        scenario: Scenario,

        #[command(flatten)]
        overrides: Overrides,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a scenario as a check: exit 0 only if it completed and matched
    Check {
        scenario: Scenario,

        #[command(flatten)]
        overrides: Overrides,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the available scenarios
    List,

    /// Print the effective configuration as TOML
    Config {
        #[command(flatten)]
        overrides: Overrides,
    },
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => Level::WARN,
        (false, 0) => Level::INFO,
        (false, 1) => Level::DEBUG,
        (false, _) => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_thread_names(true)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&PathBuf>, overrides: &Overrides) -> Result<Config, RacelabError> {
    let mut config = Config::load_or_default(path.map(PathBuf::as_path))?;
    config.apply(overrides);
    config.validate()?;
    Ok(config)
}

/// Runs the scenario and prints its report. Returns whether it passed.
fn run(
    config_path: Option<&PathBuf>,
    scenario: Scenario,
    overrides: &Overrides,
    json: bool,
) -> Result<bool, RacelabError> {
    let config = load_config(config_path, overrides)?;
    let report = run_scenario(&config, scenario)?;
    if json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report);
    }
    Ok(report.passed())
}

fn list_scenarios() {
    let width = Scenario::ALL
        .iter()
        .map(|s| s.name().len())
        .max()
        .unwrap_or(0);
    for scenario in Scenario::ALL {
        println!("  {:<width$}  {}", scenario.name(), scenario.description());
    }
}

fn execute(cli: Cli) -> Result<ExitCode, RacelabError> {
    let config_path = cli.config.as_ref();
    match cli.command {
        Commands::Run {
            scenario,
            overrides,
            json,
        } => {
            run(config_path, scenario, &overrides, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check {
            scenario,
            overrides,
            json,
        } => {
            if run(config_path, scenario, &overrides, json)? {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(1))
            }
        }
        Commands::List => {
            list_scenarios();
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config { overrides } => {
            let config = load_config(config_path, &overrides)?;
            print!("{}", config.to_toml()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match execute(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:?}", miette::Report::new(err));
            ExitCode::from(2)
        }
    }
}
