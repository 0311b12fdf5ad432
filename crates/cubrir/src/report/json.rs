//! JSON summary writer.
//!
//! Emits `coverage-summary.json` with per-file and total covered/total
//! pairs and percentages for the four metrics.

use super::ReportWriter;
use crate::map::{CoverageMap, CoverageSummary, MetricTotals};
use crate::result::CubrirResult;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Serialize)]
struct MetricJson {
    covered: usize,
    total: usize,
    pct: f64,
}

impl From<MetricTotals> for MetricJson {
    fn from(totals: MetricTotals) -> Self {
        Self {
            covered: totals.covered,
            total: totals.total,
            pct: totals.percent(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SummaryJson {
    statements: MetricJson,
    branches: MetricJson,
    functions: MetricJson,
    lines: MetricJson,
}

impl From<CoverageSummary> for SummaryJson {
    fn from(summary: CoverageSummary) -> Self {
        Self {
            statements: summary.statements.into(),
            branches: summary.branches.into(),
            functions: summary.functions.into(),
            lines: summary.lines.into(),
        }
    }
}

/// `coverage-summary.json` writer
#[derive(Debug, Default)]
pub struct JsonSummaryWriter;

impl ReportWriter for JsonSummaryWriter {
    fn name(&self) -> &'static str {
        "json-summary"
    }

    fn write(&self, map: &CoverageMap, reports_directory: &Path) -> CubrirResult<()> {
        let mut document: BTreeMap<String, SummaryJson> = BTreeMap::new();
        document.insert("total".to_string(), map.summary().into());
        for (path, entry) in map.iter() {
            document.insert(path.display().to_string(), entry.summary().into());
        }

        let json = serde_json::to_string_pretty(&document)?;
        std::fs::write(reports_directory.join("coverage-summary.json"), json)?;
        Ok(())
    }
}
