//! Cross-worker aggregation of reconciled coverage.
//!
//! Batches arrive whenever an isolated execution finishes (one per
//! worker/isolate/browser page per test file) and in no particular order.
//! The merge itself is commutative and associative (see [`crate::map`]), so
//! arrival order never changes the final map; the aggregator adds the
//! remaining guarantees: a single-writer discipline behind a mutex, per
//! (file, batch) idempotence so re-reconciling the same snapshot never
//! double-counts, canonical path rewriting for batches from foreign
//! execution contexts, and a cancellation gate that rejects late batches.

use crate::map::{CoverageMap, CoverageMapEntry};
use crate::result::CubrirResult;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::warn;

/// Coverage fragments from one finished execution
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageBatch {
    /// Stable identity of the execution (worker + test file + run)
    pub id: String,
    /// Reconciled per-file fragments
    pub entries: Vec<CoverageMapEntry>,
}

impl CoverageBatch {
    /// Create a batch
    #[must_use]
    pub fn new(id: impl Into<String>, entries: Vec<CoverageMapEntry>) -> Self {
        Self {
            id: id.into(),
            entries,
        }
    }
}

/// Context-supplied rule rewriting foreign-context paths to canonical form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlRewriteRule {
    /// Prefix as seen in the foreign context (e.g. a served-page origin)
    pub from_prefix: String,
    /// Canonical replacement (e.g. the project root)
    pub to_prefix: String,
}

impl UrlRewriteRule {
    /// Create a rule
    #[must_use]
    pub fn new(from_prefix: impl Into<String>, to_prefix: impl Into<String>) -> Self {
        Self {
            from_prefix: from_prefix.into(),
            to_prefix: to_prefix.into(),
        }
    }
}

#[derive(Debug, Default)]
struct AggregatorState {
    map: CoverageMap,
    merged: HashSet<(PathBuf, String)>,
    rewrites: Vec<UrlRewriteRule>,
}

/// Shared merge point for all execution batches of a run
#[derive(Debug, Default)]
pub struct Aggregator {
    state: Mutex<AggregatorState>,
    cancelled: AtomicBool,
}

impl Aggregator {
    /// Create an empty aggregator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregator with cross-context rewrite rules
    #[must_use]
    pub fn with_rewrites(rewrites: Vec<UrlRewriteRule>) -> Self {
        Self {
            state: Mutex::new(AggregatorState {
                rewrites,
                ..AggregatorState::default()
            }),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Add a rewrite rule discovered while the run executes, e.g. the
    /// origin of a freshly opened served page
    pub async fn add_rewrite(&self, rule: UrlRewriteRule) {
        let mut state = self.state.lock().await;
        if !state.rewrites.contains(&rule) {
            state.rewrites.push(rule);
        }
    }

    /// Merge one batch into the shared map.
    ///
    /// Safe to call concurrently from completing workers; merges serialize
    /// behind the internal mutex. Batches offered after cancellation are
    /// dropped. Merging a batch already seen for a file is a no-op, which
    /// keeps re-reconciliation of the same raw snapshot idempotent.
    ///
    /// Several fragments inside one batch may normalize to the same
    /// canonical file (cache-busted URLs of one module); those are summed
    /// with each other before the per-(file, batch) idempotence check, so
    /// the check only guards against re-offering the same snapshot.
    pub async fn merge_batch(&self, batch: CoverageBatch) -> CubrirResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            warn!(batch = %batch.id, "run cancelled, dropping late coverage batch");
            return Ok(());
        }

        let mut state = self.state.lock().await;

        let mut canonical: BTreeMap<PathBuf, CoverageMapEntry> = BTreeMap::new();
        for entry in batch.entries {
            let Some(path) = canonical_path(&entry.path, &state.rewrites) else {
                warn!(
                    batch = %batch.id,
                    path = %entry.path.display(),
                    "cannot rewrite foreign-context path, dropping entry"
                );
                continue;
            };

            match canonical.get_mut(&path) {
                Some(existing) => existing.merge(&entry),
                None => {
                    let mut rewritten = entry;
                    rewritten.path = path.clone();
                    let _ = canonical.insert(path, rewritten);
                }
            }
        }

        for (path, entry) in canonical {
            if !state.merged.insert((path, batch.id.clone())) {
                continue;
            }
            state.map.merge_entry(entry);
        }
        Ok(())
    }

    /// Snapshot the merged map
    pub async fn snapshot(&self) -> CoverageMap {
        self.state.lock().await.map.clone()
    }

    /// Drop all merged data, e.g. at the start of a fresh watch-mode run
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.map.clear();
        state.merged.clear();
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Refuse any further batches
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been observed
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Rewrite a batch path to canonical file-path form.
///
/// Paths already in file-path form pass through; URL-shaped paths must
/// match a rewrite rule or the entry is dropped rather than merged under a
/// wrong key.
fn canonical_path(path: &std::path::Path, rewrites: &[UrlRewriteRule]) -> Option<PathBuf> {
    let text = path.to_string_lossy();
    for rule in rewrites {
        if let Some(rest) = text.strip_prefix(rule.from_prefix.as_str()) {
            return Some(PathBuf::from(format!("{}{rest}", rule.to_prefix)));
        }
    }
    if text.contains("://") {
        return None;
    }
    Some(path.to_path_buf())
}
