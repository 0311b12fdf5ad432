//! Aggregated coverage map, keyed by original source positions.
//!
//! A [`CoverageMapEntry`] holds statement/branch/function/line hit counts
//! for one original file. Entries are keyed by position in the original
//! source, so merging two entries for the same file is plain summation:
//! commutative, associative, with the empty entry as identity. Entries are
//! produced by reconciliation (pure) and mutated only by the aggregator.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A position in an original source file
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct SourceLocation {
    /// Line number (1-indexed)
    pub line: u32,
    /// Column number (0-indexed)
    pub column: u32,
}

impl SourceLocation {
    /// Create a location
    #[must_use]
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// A half-open range of original source positions
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct SourceRange {
    /// First covered position
    pub start: SourceLocation,
    /// Last covered position
    pub end: SourceLocation,
}

impl SourceRange {
    /// Create a range
    #[must_use]
    pub const fn new(start: SourceLocation, end: SourceLocation) -> Self {
        Self { start, end }
    }
}

/// Identity of a function site in the original source
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FunctionKey {
    /// Line the function starts on (1-indexed)
    pub line: u32,
    /// Function name; empty for anonymous functions
    pub name: String,
}

/// Identity of a branch arm in the original source
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BranchKey {
    /// Range of the enclosing branch construct
    pub range: SourceRange,
    /// Arm index within the construct
    pub arm: u32,
}

/// Covered/total pair for one metric
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricTotals {
    /// Number of positions with a non-zero hit count
    pub covered: usize,
    /// Number of tracked positions
    pub total: usize,
}

impl MetricTotals {
    /// Coverage percentage; an empty metric is vacuously 100%
    #[must_use]
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.covered as f64 / self.total as f64) * 100.0
    }

    /// Fold another pair into this one
    pub fn add(&mut self, other: MetricTotals) {
        self.covered += other.covered;
        self.total += other.total;
    }
}

/// Summary of all four metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageSummary {
    /// Statement totals
    pub statements: MetricTotals,
    /// Branch-arm totals
    pub branches: MetricTotals,
    /// Function totals
    pub functions: MetricTotals,
    /// Line totals
    pub lines: MetricTotals,
}

impl CoverageSummary {
    /// Fold another summary into this one
    pub fn add(&mut self, other: &CoverageSummary) {
        self.statements.add(other.statements);
        self.branches.add(other.branches);
        self.functions.add(other.functions);
        self.lines.add(other.lines);
    }
}

/// Per-original-file aggregated coverage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageMapEntry {
    /// Original file path
    pub path: PathBuf,
    /// Hit counts per statement range
    pub statements: BTreeMap<SourceRange, u64>,
    /// Hit counts per branch arm
    pub branches: BTreeMap<BranchKey, u64>,
    /// Hit counts per function site
    pub functions: BTreeMap<FunctionKey, u64>,
    /// Hit counts per line
    pub lines: BTreeMap<u32, u64>,
}

impl CoverageMapEntry {
    /// Create an empty entry for a file
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            statements: BTreeMap::new(),
            branches: BTreeMap::new(),
            functions: BTreeMap::new(),
            lines: BTreeMap::new(),
        }
    }

    /// Entry for a file that never executed: every line tracked, zero hits.
    ///
    /// Used by "all files" mode to surface never-imported files in reports.
    #[must_use]
    pub fn zero_filled(path: impl Into<PathBuf>, line_count: u32) -> Self {
        let mut entry = Self::new(path);
        for line in 1..=line_count {
            entry.lines.insert(line, 0);
        }
        entry
    }

    /// Record hits on a statement range
    pub fn record_statement(&mut self, range: SourceRange, count: u64) {
        *self.statements.entry(range).or_insert(0) += count;
    }

    /// Record hits on a branch arm
    pub fn record_branch(&mut self, key: BranchKey, count: u64) {
        *self.branches.entry(key).or_insert(0) += count;
    }

    /// Record calls of a function site
    pub fn record_function(&mut self, key: FunctionKey, count: u64) {
        *self.functions.entry(key).or_insert(0) += count;
    }

    /// Record hits on a line
    pub fn record_line(&mut self, line: u32, count: u64) {
        *self.lines.entry(line).or_insert(0) += count;
    }

    /// Check whether the entry tracks any position at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
            && self.branches.is_empty()
            && self.functions.is_empty()
            && self.lines.is_empty()
    }

    /// Sum another entry for the same file into this one
    pub fn merge(&mut self, other: &CoverageMapEntry) {
        for (range, count) in &other.statements {
            self.record_statement(*range, *count);
        }
        for (key, count) in &other.branches {
            self.record_branch(*key, *count);
        }
        for (key, count) in &other.functions {
            self.record_function(key.clone(), *count);
        }
        for (line, count) in &other.lines {
            self.record_line(*line, *count);
        }
    }

    /// Metric summary for this file
    #[must_use]
    pub fn summary(&self) -> CoverageSummary {
        fn totals<K>(map: &BTreeMap<K, u64>) -> MetricTotals {
            MetricTotals {
                covered: map.values().filter(|&&c| c > 0).count(),
                total: map.len(),
            }
        }
        CoverageSummary {
            statements: totals(&self.statements),
            branches: totals(&self.branches),
            functions: totals(&self.functions),
            lines: totals(&self.lines),
        }
    }
}

/// Merged coverage for a whole run, keyed by original file path
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageMap {
    entries: BTreeMap<PathBuf, CoverageMapEntry>,
}

impl CoverageMap {
    /// Create an empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a per-file entry into the map
    pub fn merge_entry(&mut self, entry: CoverageMapEntry) {
        match self.entries.get_mut(&entry.path) {
            Some(existing) => existing.merge(&entry),
            None => {
                let _ = self.entries.insert(entry.path.clone(), entry);
            }
        }
    }

    /// Merge a whole map into this one
    pub fn merge(&mut self, other: &CoverageMap) {
        for entry in other.entries.values() {
            self.merge_entry(entry.clone());
        }
    }

    /// Look up the entry for a file
    #[must_use]
    pub fn entry(&self, path: &Path) -> Option<&CoverageMapEntry> {
        self.entries.get(path)
    }

    /// Check whether a file is tracked
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    /// Number of tracked files
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether any file is tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in path order
    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &CoverageMapEntry)> {
        self.entries.iter()
    }

    /// Tracked file paths, in order
    pub fn files(&self) -> impl Iterator<Item = &PathBuf> {
        self.entries.keys()
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Keep only the files the predicate accepts
    pub fn retain(&mut self, mut keep: impl FnMut(&Path) -> bool) {
        self.entries.retain(|path, _| keep(path));
    }

    /// Run-wide summary across all files
    #[must_use]
    pub fn summary(&self) -> CoverageSummary {
        let mut summary = CoverageSummary::default();
        for entry in self.entries.values() {
            summary.add(&entry.summary());
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn loc(line: u32, column: u32) -> SourceLocation {
        SourceLocation::new(line, column)
    }

    fn stmt(line: u32) -> SourceRange {
        SourceRange::new(loc(line, 0), loc(line, 20))
    }

    #[test]
    fn disjoint_statements_merge_side_by_side() {
        // Two batches, disjoint statements: {stmt1: 2} and {stmt2: 5}.
        let mut a = CoverageMapEntry::new("/src/math.ts");
        a.record_statement(stmt(1), 2);
        let mut b = CoverageMapEntry::new("/src/math.ts");
        b.record_statement(stmt(2), 5);

        a.merge(&b);
        assert_eq!(a.statements[&stmt(1)], 2);
        assert_eq!(a.statements[&stmt(2)], 5);
    }

    #[test]
    fn same_statement_merge_sums() {
        // Same statement hit in two batches: 2 + 3 = 5.
        let mut a = CoverageMapEntry::new("/src/math.ts");
        a.record_statement(stmt(1), 2);
        let mut b = CoverageMapEntry::new("/src/math.ts");
        b.record_statement(stmt(1), 3);

        a.merge(&b);
        assert_eq!(a.statements[&stmt(1)], 5);
    }

    #[test]
    fn merging_empty_map_is_identity() {
        let mut map = CoverageMap::new();
        let mut entry = CoverageMapEntry::new("/src/a.ts");
        entry.record_line(1, 3);
        map.merge_entry(entry);

        let before = map.clone();
        map.merge(&CoverageMap::new());
        assert_eq!(map, before);
    }

    #[test]
    fn zero_filled_tracks_all_lines_uncovered() {
        let entry = CoverageMapEntry::zero_filled("/src/unused.ts", 10);
        let summary = entry.summary();
        assert_eq!(summary.lines.total, 10);
        assert_eq!(summary.lines.covered, 0);
        assert!((summary.lines.percent() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_metric_is_vacuously_full() {
        let totals = MetricTotals::default();
        assert!((totals.percent() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn summary_counts_covered_positions() {
        let mut entry = CoverageMapEntry::new("/src/a.ts");
        entry.record_function(
            FunctionKey {
                line: 1,
                name: "add".to_string(),
            },
            2,
        );
        entry.record_function(
            FunctionKey {
                line: 5,
                name: "sub".to_string(),
            },
            0,
        );
        entry.record_line(1, 2);
        entry.record_line(5, 0);

        let summary = entry.summary();
        assert_eq!(summary.functions.covered, 1);
        assert_eq!(summary.functions.total, 2);
        assert!((summary.functions.percent() - 50.0).abs() < f64::EPSILON);
        assert_eq!(summary.lines.covered, 1);
    }

    #[test]
    fn map_summary_folds_files() {
        let mut map = CoverageMap::new();
        let mut a = CoverageMapEntry::new("/src/a.ts");
        a.record_line(1, 1);
        let mut b = CoverageMapEntry::new("/src/b.ts");
        b.record_line(1, 0);
        map.merge_entry(a);
        map.merge_entry(b);

        let summary = map.summary();
        assert_eq!(summary.lines.total, 2);
        assert_eq!(summary.lines.covered, 1);
        assert_eq!(map.len(), 2);
    }

    fn arbitrary_entry() -> impl Strategy<Value = CoverageMapEntry> {
        proptest::collection::vec((1u32..50, 0u64..10), 0..12).prop_map(|hits| {
            let mut entry = CoverageMapEntry::new("/src/prop.ts");
            for (line, count) in hits {
                entry.record_line(line, count);
                entry.record_statement(stmt(line), count);
            }
            entry
        })
    }

    proptest! {
        #[test]
        fn merge_is_commutative(entries in proptest::collection::vec(arbitrary_entry(), 0..6)) {
            let mut forward = CoverageMap::new();
            for entry in &entries {
                forward.merge_entry(entry.clone());
            }
            let mut reverse = CoverageMap::new();
            for entry in entries.iter().rev() {
                reverse.merge_entry(entry.clone());
            }
            prop_assert_eq!(forward, reverse);
        }

        #[test]
        fn merge_is_associative(a in arbitrary_entry(), b in arbitrary_entry(), c in arbitrary_entry()) {
            let mut left = CoverageMap::new();
            left.merge_entry(a.clone());
            left.merge_entry(b.clone());
            let mut right = CoverageMap::new();
            right.merge_entry(b);
            right.merge_entry(c.clone());

            // (a + b) + c == a + (b + c)
            let mut lhs = left.clone();
            lhs.merge_entry(c);
            let mut rhs = CoverageMap::new();
            rhs.merge_entry(a);
            rhs.merge(&right);
            prop_assert_eq!(lhs, rhs);
        }
    }
}
