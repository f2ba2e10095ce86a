//!
//! Scenario reports.
//!
//! A report always carries both the analytically expected value and the
//! observed one for every quantity, plus the liveness of the run, so the two
//! can be diffed by eye or by a script. Lost updates are data here, not
//! errors; the verdict only classifies them.
//!

use std::fmt::{self, Write as _};
use std::time::Duration;

use serde::Serialize;

use crate::harness::{Liveness, RunOutcome, serialize_secs};
use crate::money::Money;
use crate::scenario::Scenario;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Count,
    Cents,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationKind {
    /// A value of the shared state.
    Value,
    /// How many lock acquisitions gave up.
    LockTimeouts,
    /// How many operations were refused, such as an overdrawn withdrawal.
    FailedOperations,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Observation {
    pub label: String,
    pub kind: ObservationKind,
    pub unit: Unit,
    pub expected: i64,
    pub actual: i64,
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl Observation {
    pub fn count(label: impl Into<String>, expected: u64, actual: u64) -> Self {
        Self {
            label: label.into(),
            kind: ObservationKind::Value,
            unit: Unit::Count,
            expected: saturating_i64(expected),
            actual: saturating_i64(actual),
        }
    }

    pub fn money(label: impl Into<String>, expected: Money, actual: Money) -> Self {
        Self {
            label: label.into(),
            kind: ObservationKind::Value,
            unit: Unit::Cents,
            expected: expected.cents(),
            actual: actual.cents(),
        }
    }

    pub fn lock_timeouts(label: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self {
            kind: ObservationKind::LockTimeouts,
            ..Self::count(label, expected as u64, actual as u64)
        }
    }

    pub fn failed_operations(label: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self {
            kind: ObservationKind::FailedOperations,
            ..Self::count(label, expected as u64, actual as u64)
        }
    }

    pub fn matches(&self) -> bool {
        self.expected == self.actual
    }

    pub fn discrepancy(&self) -> i64 {
        self.actual - self.expected
    }

    fn format_value(&self, value: i64) -> String {
        match self.unit {
            Unit::Count => value.to_string(),
            Unit::Cents => Money::from_cents(value).to_string(),
        }
    }
}

/// How a run turned out, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Workers still alive after the join timeout.
    StillRunning,
    /// More lock acquisitions timed out than the scenario predicts.
    LockTimedOut,
    /// Locks were acquired but the final values are wrong.
    Diverged,
    Matched,
}

impl Verdict {
    pub fn is_pass(self) -> bool {
        self == Verdict::Matched
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::StillRunning => "still running after timeout (suspected deadlock)",
            Verdict::LockTimedOut => "lock acquisition timed out",
            Verdict::Diverged => "diverged from expected values",
            Verdict::Matched => "matched expected values",
        }
    }
}

/// How value observations are laid out in the text rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// One line per observation with expected, actual and discrepancy.
    Lines,
    /// Actual values only, `columns` per row, followed by a mismatch count.
    Grid { columns: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub scenario: Scenario,
    pub title: String,
    pub workers: usize,
    pub liveness: Liveness,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    pub panicked_workers: usize,
    pub observations: Vec<Observation>,
    pub notes: Vec<String>,
    pub verdict: Verdict,
    #[serde(skip)]
    pub layout: Layout,
}

impl Report {
    pub fn new(scenario: Scenario, outcome: &RunOutcome) -> Self {
        Self {
            scenario,
            title: scenario.title().to_string(),
            workers: outcome.workers,
            liveness: outcome.liveness,
            elapsed: outcome.elapsed,
            panicked_workers: outcome.panicked,
            observations: Vec::new(),
            notes: Vec::new(),
            verdict: Verdict::Matched,
            layout: Layout::Lines,
        }
    }

    pub fn observe(mut self, observation: Observation) -> Self {
        self.observations.push(observation);
        self.verdict = self.judge();
        self
    }

    pub fn observe_all(mut self, observations: impl IntoIterator<Item = Observation>) -> Self {
        self.observations.extend(observations);
        self.verdict = self.judge();
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    /// Folds in a later sequential run of the same scenario.
    pub fn merge_run(mut self, outcome: &RunOutcome) -> Self {
        self.workers += outcome.workers;
        self.liveness = self.liveness.and(outcome.liveness);
        self.elapsed += outcome.elapsed;
        self.panicked_workers += outcome.panicked;
        self.verdict = self.judge();
        self
    }

    fn judge(&self) -> Verdict {
        if !self.liveness.is_completed() {
            return Verdict::StillRunning;
        }
        let timed_out = self
            .observations
            .iter()
            .any(|o| o.kind == ObservationKind::LockTimeouts && o.actual > o.expected);
        if timed_out {
            return Verdict::LockTimedOut;
        }
        if self.panicked_workers > 0 || self.observations.iter().any(|o| !o.matches()) {
            return Verdict::Diverged;
        }
        Verdict::Matched
    }

    pub fn passed(&self) -> bool {
        self.verdict.is_pass()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    fn render_lines(&self, out: &mut String) -> fmt::Result {
        for o in &self.observations {
            writeln!(out, "{}:", o.label)?;
            writeln!(out, "  expected: {}", o.format_value(o.expected))?;
            writeln!(out, "  actual:   {}", o.format_value(o.actual))?;
            if !o.matches() {
                let delta = o.discrepancy();
                let sign = if delta > 0 { "+" } else { "-" };
                writeln!(
                    out,
                    "  discrepancy: {}{}",
                    sign,
                    o.format_value(delta.abs())
                )?;
            }
        }
        Ok(())
    }

    fn render_grid(&self, out: &mut String, columns: usize) -> fmt::Result {
        let (values, others): (Vec<_>, Vec<_>) = self
            .observations
            .iter()
            .partition(|o| o.kind == ObservationKind::Value);

        if let Some(first) = values.first() {
            writeln!(out, "Expected each: {}", first.format_value(first.expected))?;
        }
        for row in values.chunks(columns.max(1)) {
            for o in row {
                write!(out, "{:>7}   ", o.format_value(o.actual))?;
            }
            writeln!(out)?;
        }
        let off = values.iter().filter(|o| !o.matches()).count();
        writeln!(out, "Off balance: {} of {}", off, values.len())?;

        for o in others {
            writeln!(
                out,
                "{}: expected {}, actual {}",
                o.label,
                o.format_value(o.expected),
                o.format_value(o.actual)
            )?;
        }
        Ok(())
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = self.render_into(&mut out);
        out
    }

    fn render_into(&self, out: &mut String) -> fmt::Result {
        writeln!(out, "=== {} ===", self.title)?;
        writeln!(out, "Workers: {}", self.workers)?;

        if let Liveness::StillRunningAfterTimeout { stuck, timeout } = self.liveness {
            writeln!(
                out,
                "Deadlock suspected: {} worker(s) still running after {:.2} seconds",
                stuck,
                timeout.as_secs_f64()
            )?;
            writeln!(out, "Values below are partial state and unreliable.")?;
        }

        match self.layout {
            Layout::Lines => self.render_lines(out)?,
            Layout::Grid { columns } => self.render_grid(out, columns)?,
        }

        if self.panicked_workers > 0 {
            writeln!(out, "Panicked workers: {}", self.panicked_workers)?;
        }
        writeln!(out, "Execution time: {:.2} seconds", self.elapsed.as_secs_f64())?;
        for note in &self.notes {
            writeln!(out, "Note: {}", note)?;
        }
        writeln!(out, "Result: {}", self.verdict.as_str())
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(liveness: Liveness) -> RunOutcome {
        RunOutcome {
            workers: 2,
            liveness,
            panicked: 0,
            elapsed: Duration::from_millis(1500),
        }
    }

    #[test]
    fn test_matched_report() {
        let report = Report::new(Scenario::CounterGuarded, &outcome(Liveness::Completed))
            .observe(Observation::count("Final counter value", 200_000, 200_000));

        assert_eq!(report.verdict, Verdict::Matched);
        assert!(report.passed());
        let text = report.render();
        assert!(text.contains("expected: 200000"));
        assert!(text.contains("actual:   200000"));
        assert!(!text.contains("discrepancy"));
        assert!(text.contains("Execution time: 1.50 seconds"));
    }

    #[test]
    fn test_lost_updates_are_reported_as_divergence() {
        let report = Report::new(Scenario::CounterRace, &outcome(Liveness::Completed))
            .observe(Observation::count("Final counter value", 200_000, 186_512));

        assert_eq!(report.verdict, Verdict::Diverged);
        assert_eq!(report.observations[0].discrepancy(), -13_488);
        assert!(report.render().contains("discrepancy: -13488"));
    }

    #[test]
    fn test_timeouts_are_distinct_from_divergence() {
        let report = Report::new(Scenario::LockVsReentrant, &outcome(Liveness::Completed))
            .observe(Observation::count("resource A", 2, 1))
            .observe(Observation::lock_timeouts("nested acquire timeouts", 0, 1));
        assert_eq!(report.verdict, Verdict::LockTimedOut);

        let predicted = Report::new(Scenario::LockVsReentrant, &outcome(Liveness::Completed))
            .observe(Observation::lock_timeouts("nested acquire timeouts", 1, 1));
        assert_eq!(predicted.verdict, Verdict::Matched);
    }

    #[test]
    fn test_stuck_run_is_labelled_unreliable() {
        let report = Report::new(
            Scenario::Deadlock,
            &outcome(Liveness::StillRunningAfterTimeout {
                stuck: 2,
                timeout: Duration::from_secs(3),
            }),
        )
        .observe(Observation::count("resource A", 2, 0));

        assert_eq!(report.verdict, Verdict::StillRunning);
        let text = report.render();
        assert!(text.contains("2 worker(s) still running after 3.00 seconds"));
        assert!(text.contains("unreliable"));
    }

    #[test]
    fn test_grid_layout() {
        let expected = Money::from_cents(100_000);
        let report = Report::new(Scenario::BankUnguarded, &outcome(Liveness::Completed))
            .observe_all((0..6).map(|i| {
                let actual = if i == 4 {
                    Money::from_cents(98_505)
                } else {
                    expected
                };
                Observation::money(format!("account {}", i + 1), expected, actual)
            }))
            .with_layout(Layout::Grid { columns: 5 });

        let text = report.render();
        assert!(text.contains("1000.00   1000.00   1000.00   1000.00    985.05   \n"));
        assert!(text.contains("1000.00   \n"));
        assert!(text.contains("Off balance: 1 of 6"));
    }

    #[test]
    fn test_counts_beyond_i64_saturate() {
        let o = Observation::count("huge", u64::MAX, 3);
        assert_eq!(o.expected, i64::MAX);
        assert_eq!(o.actual, 3);
        assert!(!o.matches());
    }

    #[test]
    fn test_json_output() {
        let report = Report::new(Scenario::Deadlock, &outcome(Liveness::Completed))
            .observe(Observation::money("account 1", Money::from_cents(100), Money::from_cents(100)))
            .note("single pass");
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["scenario"], "deadlock");
        assert_eq!(json["liveness"]["status"], "completed");
        assert_eq!(json["verdict"], "matched");
        assert_eq!(json["elapsed"], 1.5);
        assert_eq!(json["observations"][0]["expected"], 100);
        assert_eq!(json["observations"][0]["unit"], "cents");
    }
}
