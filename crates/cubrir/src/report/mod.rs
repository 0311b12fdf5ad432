//! Coverage report writers.
//!
//! Each writer renders the merged [`CoverageMap`] into one output format
//! under the reports directory. Writers are selected by name from the
//! resolved options; an unknown name is a configuration error surfaced
//! before any test executes.

mod json;
mod lcov;
mod text;

pub use json::JsonSummaryWriter;
pub use lcov::LcovWriter;
pub use text::TextWriter;

use crate::map::CoverageMap;
use crate::result::{CubrirError, CubrirResult};
use std::path::Path;

/// Renders a merged coverage map into one report format
pub trait ReportWriter: Send + Sync {
    /// Name the writer is selected by in configuration
    fn name(&self) -> &'static str;

    /// Render the map into `reports_directory`
    ///
    /// # Errors
    ///
    /// Returns an error when the report cannot be written
    fn write(&self, map: &CoverageMap, reports_directory: &Path) -> CubrirResult<()>;
}

/// Instantiate writers for a list of configured reporter names.
///
/// # Errors
///
/// Returns [`CubrirError::InvalidConfig`] for an unknown reporter name.
pub fn writers_for(names: &[String]) -> CubrirResult<Vec<Box<dyn ReportWriter>>> {
    names
        .iter()
        .map(|name| -> CubrirResult<Box<dyn ReportWriter>> {
            match name.as_str() {
                "lcov" => Ok(Box::new(LcovWriter::default())),
                "json-summary" => Ok(Box::new(JsonSummaryWriter)),
                "text" => Ok(Box::new(TextWriter::default())),
                other => Err(CubrirError::InvalidConfig {
                    message: format!("unknown coverage reporter `{other}`"),
                }),
            }
        })
        .collect()
}
