//! Instrumentation provider: counters embedded at transform time.
//!
//! Instrumented code increments counters keyed by original source
//! positions while it runs, so snapshots arrive already reconciled and the
//! harness wrapper never enters the picture. The provider's only remapping
//! job is shape conversion: instrumentation ids back to the positions they
//! were registered under.
//!
//! Counter state lives in a [`HitCountStore`] shared with the running
//! code. Between runs the counts are zeroed in place; the registered
//! statement, function, and branch shapes survive so an untouched file
//! still reports all of its positions at zero.

use super::{
    finalize, CoverageProvider, CoveragePayload, ExecutionMeta, ProviderContext, ReportContext,
};
use crate::aggregate::{Aggregator, CoverageBatch};
use crate::config::ResolvedCoverageOptions;
use crate::map::{BranchKey, CoverageMapEntry, FunctionKey, SourceRange};
use crate::result::CubrirResult;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

/// Registered positions and live counters for one instrumented file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileHitCounts {
    statements: BTreeMap<u32, SourceRange>,
    statement_hits: BTreeMap<u32, u64>,
    functions: BTreeMap<u32, FunctionKey>,
    function_hits: BTreeMap<u32, u64>,
    branches: BTreeMap<u32, SourceRange>,
    branch_hits: BTreeMap<u32, Vec<u64>>,
}

impl FileHitCounts {
    /// Register a statement site
    pub fn register_statement(&mut self, id: u32, range: SourceRange) {
        let _ = self.statements.insert(id, range);
        let _ = self.statement_hits.entry(id).or_insert(0);
    }

    /// Register a function site
    pub fn register_function(&mut self, id: u32, key: FunctionKey) {
        let _ = self.functions.insert(id, key);
        let _ = self.function_hits.entry(id).or_insert(0);
    }

    /// Register a branch construct with a fixed number of arms
    pub fn register_branch(&mut self, id: u32, range: SourceRange, arms: usize) {
        let _ = self.branches.insert(id, range);
        let _ = self.branch_hits.entry(id).or_insert_with(|| vec![0; arms]);
    }

    /// Count one execution of a statement
    pub fn hit_statement(&mut self, id: u32) {
        if let Some(count) = self.statement_hits.get_mut(&id) {
            *count += 1;
        }
    }

    /// Count one call of a function
    pub fn hit_function(&mut self, id: u32) {
        if let Some(count) = self.function_hits.get_mut(&id) {
            *count += 1;
        }
    }

    /// Count one taken branch arm
    pub fn hit_branch(&mut self, id: u32, arm: usize) {
        if let Some(arms) = self.branch_hits.get_mut(&id) {
            if let Some(count) = arms.get_mut(arm) {
                *count += 1;
            }
        }
    }

    /// Zero every counter, keeping the registered shapes
    pub fn reset_counts(&mut self) {
        for count in self.statement_hits.values_mut() {
            *count = 0;
        }
        for count in self.function_hits.values_mut() {
            *count = 0;
        }
        for arms in self.branch_hits.values_mut() {
            arms.fill(0);
        }
    }

    /// Convert ids back to the positions they were registered under
    #[must_use]
    pub fn to_entry(&self, path: &Path) -> CoverageMapEntry {
        let mut entry = CoverageMapEntry::new(path);
        let mut line_hits: BTreeMap<u32, u64> = BTreeMap::new();

        for (id, range) in &self.statements {
            let count = self.statement_hits.get(id).copied().unwrap_or(0);
            entry.record_statement(*range, count);
            for line in range.start.line..=range.end.line {
                let slot = line_hits.entry(line).or_insert(0);
                *slot = (*slot).max(count);
            }
        }
        for (line, count) in line_hits {
            entry.record_line(line, count);
        }
        for (id, key) in &self.functions {
            entry.record_function(
                key.clone(),
                self.function_hits.get(id).copied().unwrap_or(0),
            );
        }
        for (id, range) in &self.branches {
            if let Some(arms) = self.branch_hits.get(id) {
                for (arm, count) in arms.iter().enumerate() {
                    entry.record_branch(
                        BranchKey {
                            range: *range,
                            arm: arm as u32,
                        },
                        *count,
                    );
                }
            }
        }
        entry
    }
}

/// Point-in-time copy of every instrumented file's counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstrumentationSnapshot {
    /// Counters keyed by original file path
    pub files: BTreeMap<PathBuf, FileHitCounts>,
}

/// Counter storage shared between instrumented code and the provider
#[derive(Debug, Clone, Default)]
pub struct HitCountStore {
    inner: Arc<Mutex<BTreeMap<PathBuf, FileHitCounts>>>,
}

impl HitCountStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutate the counters of one file, creating its slot on first use
    pub fn with_file<R>(&self, path: &Path, f: impl FnOnce(&mut FileHitCounts) -> R) -> R {
        let mut files = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(files.entry(path.to_path_buf()).or_default())
    }

    /// Copy out the current counters
    #[must_use]
    pub fn snapshot(&self) -> InstrumentationSnapshot {
        let files = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        InstrumentationSnapshot {
            files: files.clone(),
        }
    }

    /// Zero all counters in place, keeping registered shapes
    pub fn reset_counts(&self) {
        let mut files = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        for counts in files.values_mut() {
            counts.reset_counts();
        }
    }
}

/// Provider backed by transform-time instrumentation counters
pub struct InstrumentationProvider {
    context: ProviderContext,
    aggregator: Aggregator,
    store: Option<HitCountStore>,
}

impl InstrumentationProvider {
    /// Provider bound to a run context
    #[must_use]
    pub fn new(context: ProviderContext) -> Self {
        Self {
            context,
            aggregator: Aggregator::new(),
            store: None,
        }
    }

    /// Attach the counter store shared with in-process executions
    #[must_use]
    pub fn with_store(mut self, store: HitCountStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Stop accepting executions, e.g. on user interrupt
    pub fn cancel(&self) {
        self.aggregator.cancel();
    }
}

impl std::fmt::Debug for InstrumentationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentationProvider")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CoverageProvider for InstrumentationProvider {
    fn name(&self) -> &'static str {
        "instrumentation"
    }

    fn options(&self) -> &ResolvedCoverageOptions {
        &self.context.options
    }

    async fn initialize(&self) -> CubrirResult<()> {
        self.aggregator.reset().await;
        if let Some(store) = &self.store {
            store.reset_counts();
        }
        Ok(())
    }

    async fn on_execution_complete(&self, meta: ExecutionMeta) -> CubrirResult<()> {
        let CoveragePayload::Instrumentation(snapshot) = meta.payload else {
            warn!(
                batch = %meta.batch_id,
                "raw profiler payload offered to the instrumentation provider, dropping"
            );
            return Ok(());
        };

        let entries = snapshot
            .files
            .iter()
            .map(|(path, counts)| counts.to_entry(path))
            .collect();
        self.aggregator
            .merge_batch(CoverageBatch::new(meta.batch_id, entries))
            .await
    }

    async fn report_coverage(&self, context: ReportContext) -> CubrirResult<()> {
        finalize(&self.context, &self.aggregator, context.all_tests_run).await
    }
}
