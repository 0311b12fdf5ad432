//! Coverage threshold enforcement and auto-update.
//!
//! After aggregation, each metric percentage is compared `>=` against the
//! configured minimum, globally and (with `per_file`) for every file. A
//! run exactly at a threshold passes. Failures are reported as a
//! structured list; the caller turns them into a non-zero exit only after
//! report writing has completed.
//!
//! When auto-update is enabled and the run exercised the full, unfiltered
//! test selection, the observed percentages overwrite the stored
//! configuration instead of gating the run: the recorded thresholds become
//! a ratchet for the next run, not a gate for this one.

use crate::map::{CoverageMap, CoverageSummary, MetricTotals};
use crate::result::{CubrirError, CubrirResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

/// The four coverage metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    /// Statement coverage
    Statements,
    /// Branch-arm coverage
    Branches,
    /// Function coverage
    Functions,
    /// Line coverage
    Lines,
}

impl Metric {
    /// All metrics, in reporting order
    pub const ALL: [Metric; 4] = [
        Metric::Statements,
        Metric::Branches,
        Metric::Functions,
        Metric::Lines,
    ];

    /// Configuration key for this metric
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Metric::Statements => "statements",
            Metric::Branches => "branches",
            Metric::Functions => "functions",
            Metric::Lines => "lines",
        }
    }

    /// Totals for this metric within a summary
    #[must_use]
    pub fn totals(self, summary: &CoverageSummary) -> MetricTotals {
        match self {
            Metric::Statements => summary.statements,
            Metric::Branches => summary.branches,
            Metric::Functions => summary.functions,
            Metric::Lines => summary.lines,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// What a threshold comparison applied to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThresholdScope {
    /// The whole run
    Global,
    /// One original file
    File(PathBuf),
}

impl fmt::Display for ThresholdScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdScope::Global => f.write_str("global"),
            ThresholdScope::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// One metric that fell below its configured minimum
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdFailure {
    /// Metric that failed
    pub metric: Metric,
    /// Global or per-file scope
    pub scope: ThresholdScope,
    /// Observed percentage
    pub actual: f64,
    /// Configured minimum
    pub required: f64,
}

impl fmt::Display for ThresholdFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "coverage for {} ({:.2}%) does not meet {} threshold ({}%)",
            self.metric, self.actual, self.scope, self.required
        )
    }
}

/// Configured minimum percentages
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdSpec {
    /// Minimum statement percentage
    pub statements: Option<f64>,
    /// Minimum branch percentage
    pub branches: Option<f64>,
    /// Minimum function percentage
    pub functions: Option<f64>,
    /// Minimum line percentage
    pub lines: Option<f64>,
    /// Apply the minimums to every file instead of only the run total
    pub per_file: bool,
}

impl ThresholdSpec {
    /// The "100" shortcut: every metric at 100%
    #[must_use]
    pub fn one_hundred() -> Self {
        Self {
            statements: Some(100.0),
            branches: Some(100.0),
            functions: Some(100.0),
            lines: Some(100.0),
            per_file: false,
        }
    }

    /// Configured minimum for a metric
    #[must_use]
    pub const fn get(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Statements => self.statements,
            Metric::Branches => self.branches,
            Metric::Functions => self.functions,
            Metric::Lines => self.lines,
        }
    }

    /// Whether no metric is gated at all
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.statements.is_none()
            && self.branches.is_none()
            && self.functions.is_none()
            && self.lines.is_none()
    }
}

/// Enforcer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcerState {
    /// No comparison run yet
    Pending,
    /// Comparison in progress
    Checked,
    /// All gated metrics at or above their minimums
    Passed,
    /// At least one metric below its minimum
    Failed,
}

/// Compares aggregated percentages against configured minimums
#[derive(Debug, Clone)]
pub struct ThresholdEnforcer {
    spec: ThresholdSpec,
    state: EnforcerState,
    failures: Vec<ThresholdFailure>,
}

impl ThresholdEnforcer {
    /// Enforcer for a spec
    #[must_use]
    pub fn new(spec: ThresholdSpec) -> Self {
        Self {
            spec,
            state: EnforcerState::Pending,
            failures: Vec::new(),
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> EnforcerState {
        self.state
    }

    /// Failures recorded by the last check
    #[must_use]
    pub fn failures(&self) -> &[ThresholdFailure] {
        &self.failures
    }

    /// Compare the map against the configured minimums.
    ///
    /// A metric exactly at its threshold passes (`>=` comparison).
    pub fn check(&mut self, map: &CoverageMap) -> &[ThresholdFailure] {
        self.state = EnforcerState::Checked;
        self.failures.clear();

        let summary = map.summary();
        self.check_summary(&summary, ThresholdScope::Global);

        if self.spec.per_file {
            for (path, entry) in map.iter() {
                let file_summary = entry.summary();
                self.check_summary(&file_summary, ThresholdScope::File(path.clone()));
            }
        }

        self.state = if self.failures.is_empty() {
            EnforcerState::Passed
        } else {
            EnforcerState::Failed
        };
        &self.failures
    }

    fn check_summary(&mut self, summary: &CoverageSummary, scope: ThresholdScope) {
        for metric in Metric::ALL {
            let Some(required) = self.spec.get(metric) else {
                continue;
            };
            let actual = metric.totals(summary).percent();
            if actual < required {
                self.failures.push(ThresholdFailure {
                    metric,
                    scope: scope.clone(),
                    actual,
                    required,
                });
            }
        }
    }

    /// Resolve the check into a result for the caller's exit code
    pub fn into_result(self) -> CubrirResult<()> {
        match self.state {
            EnforcerState::Failed => Err(CubrirError::ThresholdNotMet {
                failures: self.failures,
            }),
            _ => Ok(()),
        }
    }
}

/// Observed percentages, rounded the way they are persisted
#[must_use]
pub fn observed_thresholds(summary: &CoverageSummary, spec: &ThresholdSpec) -> ThresholdSpec {
    let observe = |metric: Metric| {
        spec.get(metric)
            .map(|_| round2(metric.totals(summary).percent()))
    };
    ThresholdSpec {
        statements: observe(Metric::Statements),
        branches: observe(Metric::Branches),
        functions: observe(Metric::Functions),
        lines: observe(Metric::Lines),
        per_file: spec.per_file,
    }
}

/// Persist freshly observed percentages into the stored configuration.
///
/// Only the threshold keys of configured metrics are touched; the rest of
/// the JSON document is preserved. Returns the spec as persisted.
pub fn update_stored_thresholds(
    config_path: &Path,
    spec: &ThresholdSpec,
    summary: &CoverageSummary,
) -> CubrirResult<ThresholdSpec> {
    let text = std::fs::read_to_string(config_path)?;
    let mut doc: serde_json::Value = serde_json::from_str(&text)?;

    let coverage = doc
        .get_mut("coverage")
        .and_then(serde_json::Value::as_object_mut)
        .ok_or_else(|| CubrirError::InvalidConfig {
            message: format!(
                "no coverage section in configuration file {}",
                config_path.display()
            ),
        })?;

    let observed = observed_thresholds(summary, spec);
    for metric in Metric::ALL {
        if let Some(value) = observed.get(metric) {
            let _ = coverage.insert(metric.key().to_string(), serde_json::json!(value));
        }
    }

    std::fs::write(config_path, serde_json::to_string_pretty(&doc)?)?;
    info!(path = %config_path.display(), "updated stored coverage thresholds");
    Ok(observed)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
