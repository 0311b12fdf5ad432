//! Coverage providers.
//!
//! A provider owns the full lifecycle of coverage for one run: preparing
//! the reports directory, receiving a batch each time an isolated
//! execution finishes, and rendering reports plus threshold enforcement
//! once the run settles. Two variants exist behind one trait: the native
//! provider consumes raw profiler payloads and reconciles them through
//! source maps, the instrumentation provider consumes counter snapshots
//! already keyed by original positions.

mod instrument;
mod native;

pub use instrument::{FileHitCounts, HitCountStore, InstrumentationProvider, InstrumentationSnapshot};
pub use native::NativeProvider;

use crate::aggregate::Aggregator;
use crate::config::{FileMatcher, ProviderKind, ResolvedCoverageOptions};
use crate::map::{CoverageMap, CoverageMapEntry};
use crate::reconcile::Reconciler;
use crate::report::{writers_for, ReportWriter, TextWriter};
use crate::result::CubrirResult;
use crate::script::RawScriptCoverage;
use crate::sourcemap::line_count;
use crate::threshold::{update_stored_thresholds, ThresholdEnforcer};
use crate::transform::TransformRegistry;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// File extensions considered source files by "all files" mode
const SOURCE_EXTENSIONS: [&str; 10] = [
    "js", "mjs", "cjs", "jsx", "ts", "mts", "cts", "tsx", "vue", "svelte",
];

/// Run context a provider is bound to
#[derive(Debug, Clone)]
pub struct ProviderContext {
    /// Resolved coverage options
    pub options: ResolvedCoverageOptions,
    /// Stored configuration file, for threshold auto-update
    pub config_path: Option<PathBuf>,
}

/// Where an execution ran
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOrigin {
    /// A worker process sharing the project filesystem
    Process,
    /// A served browser page; coverage paths carry this origin prefix
    ServedPage {
        /// Origin the page's module URLs are rooted at
        origin: String,
    },
}

/// Coverage carried by one finished execution
#[derive(Debug, Clone)]
pub enum CoveragePayload {
    /// Raw profiler entries, still in transformed byte offsets
    Native(Vec<RawScriptCoverage>),
    /// Counter snapshot, already keyed by original positions
    Instrumentation(InstrumentationSnapshot),
}

/// Notification that one isolated execution finished
#[derive(Debug, Clone)]
pub struct ExecutionMeta {
    /// Stable identity of the execution (worker + test file + run)
    pub batch_id: String,
    /// Execution context the payload came from
    pub origin: ExecutionOrigin,
    /// The coverage itself
    pub payload: CoveragePayload,
}

/// Inputs for final report generation
#[derive(Debug, Default)]
pub struct ReportContext {
    /// Whether the run executed the full, unfiltered test selection
    pub all_tests_run: bool,
    /// Transform records for every file served to the runtime
    pub registry: TransformRegistry,
    /// Offset-correction strategy for raw profiler payloads
    pub reconciler: Reconciler,
}

/// Lifecycle of coverage collection for one run
#[async_trait]
pub trait CoverageProvider: Send + Sync {
    /// Provider name as written in configuration
    fn name(&self) -> &'static str;

    /// The options this provider was resolved with
    fn options(&self) -> &ResolvedCoverageOptions;

    /// Start-of-run preparation
    async fn initialize(&self) -> CubrirResult<()>;

    /// Remove previously written reports.
    ///
    /// Honors `clean` at run start and `clean_on_rerun` between watch-mode
    /// reruns.
    fn clean(&self, rerun: bool) -> CubrirResult<()> {
        let options = self.options();
        let wanted = if rerun {
            options.clean_on_rerun
        } else {
            options.clean
        };
        if wanted && options.reports_directory.exists() {
            std::fs::remove_dir_all(&options.reports_directory)?;
        }
        Ok(())
    }

    /// Accept the coverage of one finished execution
    async fn on_execution_complete(&self, meta: ExecutionMeta) -> CubrirResult<()>;

    /// Merge everything, write reports, then enforce or update thresholds.
    ///
    /// Reports are always written before a threshold failure surfaces, so
    /// a red run still leaves artifacts to inspect.
    async fn report_coverage(&self, context: ReportContext) -> CubrirResult<()>;
}

/// Instantiate the provider the resolved options name
#[must_use]
pub fn resolve_provider(context: ProviderContext) -> Box<dyn CoverageProvider> {
    match context.options.provider {
        ProviderKind::Native => Box::new(NativeProvider::new(context)),
        ProviderKind::Instrumentation => Box::new(InstrumentationProvider::new(context)),
    }
}

/// Shared tail of `report_coverage`: zero-fill, write, gate.
pub(crate) async fn finalize(
    context: &ProviderContext,
    aggregator: &Aggregator,
    all_tests_run: bool,
) -> CubrirResult<()> {
    let options = &context.options;
    let mut map = aggregator.snapshot().await;

    if !options.include.is_empty() || !options.exclude.is_empty() {
        let matcher = FileMatcher::new(options);
        map.retain(|path| matcher.matches(path));
    }

    if options.all && all_tests_run {
        zero_fill_untouched(&mut map, options);
    }

    std::fs::create_dir_all(&options.reports_directory)?;
    for writer in resolve_writers(options)? {
        debug!(reporter = writer.name(), "writing coverage report");
        writer.write(&map, &options.reports_directory)?;
    }

    if options.threshold_auto_update && all_tests_run {
        if let Some(config_path) = context.config_path.as_deref() {
            let _ = update_stored_thresholds(config_path, &options.thresholds, &map.summary())?;
            return Ok(());
        }
        warn!("threshold auto-update enabled but no configuration path, enforcing instead");
    }

    let mut enforcer = ThresholdEnforcer::new(options.thresholds);
    let _ = enforcer.check(&map);
    enforcer.into_result()
}

fn resolve_writers(
    options: &ResolvedCoverageOptions,
) -> CubrirResult<Vec<Box<dyn ReportWriter>>> {
    let mut writers = writers_for(&options.reporter)?;
    if options.skip_full {
        for writer in &mut writers {
            if writer.name() == "text" {
                *writer = Box::new(TextWriter::skipping_full());
            }
        }
    }
    Ok(writers)
}

/// Add zero-hit entries for matching source files that never executed.
///
/// Only runs when the whole test selection executed; a filtered run would
/// otherwise report genuinely covered files as untouched.
fn zero_fill_untouched(map: &mut CoverageMap, options: &ResolvedCoverageOptions) {
    let matcher = FileMatcher::new(options);
    for entry in WalkDir::new(&options.root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_skipped_dir(e.path()))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        if !is_source_file(path) || !matcher.matches(path) || map.contains(path) {
            continue;
        }
        match std::fs::read_to_string(path) {
            Ok(text) => {
                map.merge_entry(CoverageMapEntry::zero_filled(path, line_count(&text)));
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "cannot read file for zero-fill");
            }
        }
    }
}

fn is_skipped_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name == "node_modules" || name.starts_with('.'))
}

fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext))
}
