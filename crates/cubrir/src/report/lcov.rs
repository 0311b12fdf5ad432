//! LCOV report writer.
//!
//! Renders the merged map in the `lcov.info` line format consumed by CI
//! coverage services:
//!
//! ```text
//! TN:<test name>
//! SF:<source file>
//! FN:<line>,<function name>
//! FNDA:<execution count>,<function name>
//! FNF:<functions found>
//! FNH:<functions hit>
//! BRF:<branches found>
//! BRH:<branches hit>
//! DA:<line>,<execution count>
//! LF:<lines found>
//! LH:<lines hit>
//! end_of_record
//! ```

use super::ReportWriter;
use crate::map::CoverageMap;
use crate::result::CubrirResult;
use std::path::Path;

/// LCOV format writer
#[derive(Debug, Default)]
pub struct LcovWriter {
    test_name: Option<String>,
}

impl LcovWriter {
    /// Writer tagging every record with a `TN:` test name
    #[must_use]
    pub fn with_test_name(name: impl Into<String>) -> Self {
        Self {
            test_name: Some(name.into()),
        }
    }

    /// Render the map as an LCOV string
    #[must_use]
    pub fn generate(&self, map: &CoverageMap) -> String {
        use std::fmt::Write;

        let mut output = String::new();
        for (path, entry) in map.iter() {
            match self.test_name {
                Some(ref name) => {
                    let _ = writeln!(output, "TN:{name}");
                }
                None => output.push_str("TN:\n"),
            }
            let _ = writeln!(output, "SF:{}", path.display());

            let mut functions_hit = 0usize;
            for (key, count) in &entry.functions {
                let _ = writeln!(output, "FN:{},{}", key.line, key.name);
                let _ = writeln!(output, "FNDA:{count},{}", key.name);
                if *count > 0 {
                    functions_hit += 1;
                }
            }
            let _ = writeln!(output, "FNF:{}", entry.functions.len());
            let _ = writeln!(output, "FNH:{functions_hit}");

            let branches_hit = entry.branches.values().filter(|&&c| c > 0).count();
            let _ = writeln!(output, "BRF:{}", entry.branches.len());
            let _ = writeln!(output, "BRH:{branches_hit}");

            let mut lines_hit = 0usize;
            for (line, count) in &entry.lines {
                let _ = writeln!(output, "DA:{line},{count}");
                if *count > 0 {
                    lines_hit += 1;
                }
            }
            let _ = writeln!(output, "LF:{}", entry.lines.len());
            let _ = writeln!(output, "LH:{lines_hit}");

            output.push_str("end_of_record\n");
        }
        output
    }
}

impl ReportWriter for LcovWriter {
    fn name(&self) -> &'static str {
        "lcov"
    }

    fn write(&self, map: &CoverageMap, reports_directory: &Path) -> CubrirResult<()> {
        std::fs::write(reports_directory.join("lcov.info"), self.generate(map))?;
        Ok(())
    }
}
