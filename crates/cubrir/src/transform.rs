//! Transform records supplied by the build pipeline.
//!
//! The transform pipeline hands over, per originally-authored file it
//! touched, the transformed code text and a decoded source map. Records are
//! read-only here and looked up by exact match on the normalized path,
//! after stripping the cache-busting query string the pipeline appends to
//! module URLs.

use crate::sourcemap::SourceMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Transformed state of one originally-authored source file
#[derive(Debug, Clone, PartialEq)]
pub struct TransformRecord {
    /// Original file path
    pub path: PathBuf,
    /// Transformed code text, without any harness wrapping
    pub code: String,
    /// Source map from transformed to original positions, when one exists
    pub source_map: Option<SourceMap>,
}

impl TransformRecord {
    /// Create a record
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, code: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            code: code.into(),
            source_map: None,
        }
    }

    /// Attach a source map
    #[must_use]
    pub fn with_source_map(mut self, map: SourceMap) -> Self {
        self.source_map = Some(map);
        self
    }
}

/// Lookup table of transform records, keyed by normalized file path
#[derive(Debug, Clone, Default)]
pub struct TransformRegistry {
    records: HashMap<PathBuf, TransformRecord>,
}

impl TransformRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record under its own path
    pub fn insert(&mut self, record: TransformRecord) {
        let _ = self.records.insert(record.path.clone(), record);
    }

    /// Exact-match lookup by normalized path
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&TransformRecord> {
        self.records.get(path)
    }

    /// Number of registered records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Normalize a runtime URL to a file-system path.
///
/// Strips the query string and fragment (cache-busting suffixes appended by
/// the transform pipeline) and the `file://` scheme. Served-page origins are
/// left intact; the aggregator rewrites those with context-supplied rules.
#[must_use]
pub fn normalize_url(url: &str) -> PathBuf {
    let stripped = url
        .split_once(['?', '#'])
        .map_or(url, |(before, _)| before);
    let path = stripped.strip_prefix("file://").unwrap_or(stripped);
    PathBuf::from(path)
}
