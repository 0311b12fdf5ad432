//! Plain-text summary table.
//!
//! The istanbul-style console table: one row per file with the four metric
//! percentages, plus a totals row. With `skip_full` set, files at 100% on
//! every metric are left out so large suites surface only the gaps.

use super::ReportWriter;
use crate::map::{CoverageMap, CoverageSummary};
use crate::result::CubrirResult;
use std::path::Path;

/// Console-style text writer
#[derive(Debug, Default)]
pub struct TextWriter {
    skip_full: bool,
}

impl TextWriter {
    /// Writer that omits fully covered files
    #[must_use]
    pub fn skipping_full() -> Self {
        Self { skip_full: true }
    }

    /// Render the summary table as a string
    #[must_use]
    pub fn generate(&self, map: &CoverageMap) -> String {
        use std::fmt::Write;

        let width = map
            .files()
            .map(|p| p.display().to_string().len())
            .chain(std::iter::once("File".len()))
            .max()
            .unwrap_or(4);

        let mut output = String::new();
        let _ = writeln!(
            output,
            "{:width$} | % Stmts | % Branch | % Funcs | % Lines",
            "File"
        );
        let _ = writeln!(output, "{}", "-".repeat(width + 42));

        for (path, entry) in map.iter() {
            let summary = entry.summary();
            if self.skip_full && is_full(&summary) {
                continue;
            }
            let _ = writeln!(
                output,
                "{:width$} | {:>7.2} | {:>8.2} | {:>7.2} | {:>7.2}",
                path.display().to_string(),
                summary.statements.percent(),
                summary.branches.percent(),
                summary.functions.percent(),
                summary.lines.percent(),
            );
        }

        let total = map.summary();
        let _ = writeln!(output, "{}", "-".repeat(width + 42));
        let _ = writeln!(
            output,
            "{:width$} | {:>7.2} | {:>8.2} | {:>7.2} | {:>7.2}",
            "All files",
            total.statements.percent(),
            total.branches.percent(),
            total.functions.percent(),
            total.lines.percent(),
        );
        output
    }
}

fn is_full(summary: &CoverageSummary) -> bool {
    summary.statements.covered == summary.statements.total
        && summary.branches.covered == summary.branches.total
        && summary.functions.covered == summary.functions.total
        && summary.lines.covered == summary.lines.total
}

impl ReportWriter for TextWriter {
    fn name(&self) -> &'static str {
        "text"
    }

    fn write(&self, map: &CoverageMap, reports_directory: &Path) -> CubrirResult<()> {
        let table = self.generate(map);
        tracing::info!("coverage summary:\n{table}");
        std::fs::write(reports_directory.join("coverage.txt"), table)?;
        Ok(())
    }
}
