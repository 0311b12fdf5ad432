//! Reconciliation of raw profiler coverage onto original sources.
//!
//! The profiler measures byte offsets against the wrapped transformed code
//! the runtime executed; the source map knows only the unwrapped transform.
//! Reconciliation shifts each raw offset by the harness wrapper offset
//! exactly once, resolves the shifted position through the source map, and
//! emits a per-original-file [`CoverageMapEntry`] fragment.
//!
//! Reconciliation is a pure transform: it never mutates existing entries
//! (that is the aggregator's job) and never fails the run for one bad file.
//! Anything file-scoped recovers locally: a missing transform record falls
//! back to unmapped line-level coverage from disk, a missing source map is
//! treated as already-original source, and offsets that resolve outside
//! either the transformed or the original bounds are dropped per record
//! with a diagnostic.

use crate::map::{BranchKey, CoverageMapEntry, FunctionKey, SourceLocation, SourceRange};
use crate::result::{CubrirError, CubrirResult};
use crate::script::{FunctionCoverage, RawScriptCoverage};
use crate::sourcemap::{line_count, LineIndex, SourceMap};
use crate::transform::{normalize_url, TransformRecord, TransformRegistry};
use crate::wrapping::HarnessWrapping;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

/// Pluggable reconciliation strategy.
///
/// Passed explicitly into report generation; providers never patch
/// resolution internals at runtime.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    wrapping: HarnessWrapping,
}

impl Reconciler {
    /// Reconciler for a given harness wrapping
    #[must_use]
    pub fn new(wrapping: HarnessWrapping) -> Self {
        Self { wrapping }
    }

    /// The wrapping this reconciler corrects for
    #[must_use]
    pub fn wrapping(&self) -> &HarnessWrapping {
        &self.wrapping
    }

    /// Project one raw coverage entry onto its original source.
    ///
    /// Always produces an entry; unrecoverable lookups yield an entry with
    /// zero mapped positions rather than an error.
    pub fn reconcile(
        &self,
        raw: &RawScriptCoverage,
        registry: &TransformRegistry,
    ) -> CubrirResult<CoverageMapEntry> {
        let path = normalize_url(&raw.url);
        match registry.get(&path) {
            Some(record) => Ok(self.reconcile_transformed(raw, record)),
            None => Ok(Self::reconcile_unmapped(raw, &path)),
        }
    }

    /// Raw entry with a transform record: wrapper-correct, then resolve.
    fn reconcile_transformed(
        &self,
        raw: &RawScriptCoverage,
        record: &TransformRecord,
    ) -> CoverageMapEntry {
        let Some(map) = record.source_map.as_ref() else {
            // Executed but never mapped by the transform pipeline: the code
            // is already original source, so offset correction is skipped
            // entirely.
            return entry_from_plain_text(raw, &record.path, &record.code);
        };

        let index = LineIndex::new(&record.code);
        let wrapper = self.wrapping.offset();
        let original_lines = original_line_count(record, map);
        let path_str = record.path.display().to_string();

        let mut entry = CoverageMapEntry::new(record.path.clone());
        let mut line_hits: BTreeMap<u32, u64> = BTreeMap::new();

        for function in &raw.functions {
            let mut outer_range: Option<SourceRange> = None;

            for (arm, range) in function.ranges.iter().enumerate() {
                // The wrapper offset is subtracted exactly once per raw
                // range; a range that spans the prelude boundary only
                // attributes its user-code part.
                let start = (range.start_offset as usize).saturating_sub(wrapper);
                let end = (range.end_offset as usize).saturating_sub(wrapper);
                if end <= start {
                    continue;
                }
                if start >= index.len() || end > index.len() {
                    let error = CubrirError::MalformedCoverageOffset {
                        path: path_str.clone(),
                        offset: end,
                        length: index.len(),
                    };
                    warn!(%error, "dropping range");
                    continue;
                }

                let (Some(gen_start), Some(gen_end)) =
                    (index.location(start), index.location(end - 1))
                else {
                    continue;
                };
                let Some(orig_start) = map.lookup(gen_start) else {
                    continue;
                };
                let orig_end = map.lookup(gen_end).unwrap_or(orig_start);

                if let Some(limit) = original_lines {
                    if orig_start.original_line > limit || orig_end.original_line > limit {
                        warn!(
                            path = %path_str,
                            line = orig_end.original_line.max(orig_start.original_line),
                            limit,
                            "mapped location beyond original file bounds, dropping range"
                        );
                        continue;
                    }
                }

                let resolved = SourceRange::new(
                    SourceLocation::new(orig_start.original_line, orig_start.original_column),
                    SourceLocation::new(orig_end.original_line, orig_end.original_column),
                );

                if arm == 0 {
                    outer_range = Some(resolved);
                    entry.record_function(
                        FunctionKey {
                            line: resolved.start.line,
                            name: function.function_name.clone(),
                        },
                        range.count,
                    );
                } else if function.is_block_coverage {
                    if let Some(outer) = outer_range {
                        entry.record_branch(
                            BranchKey {
                                range: outer,
                                arm: (arm - 1) as u32,
                            },
                            range.count,
                        );
                    }
                }

                entry.record_statement(resolved, range.count);
                for line in resolved.start.line..=resolved.end.line {
                    let slot = line_hits.entry(line).or_insert(0);
                    // Nested block ranges overlap; within one raw entry a
                    // line takes the highest count instead of a double
                    // counted sum.
                    *slot = (*slot).max(range.count);
                }
            }
        }

        for (line, count) in line_hits {
            entry.record_line(line, count);
        }
        entry
    }

    /// No transform record: recover unmapped line-level coverage from disk.
    fn reconcile_unmapped(raw: &RawScriptCoverage, path: &Path) -> CoverageMapEntry {
        let error = CubrirError::UnmappedSource {
            path: path.display().to_string(),
        };
        warn!(%error, "falling back to unmapped line coverage from disk");

        match std::fs::read_to_string(path) {
            Ok(text) => entry_from_plain_text(raw, path, &text),
            Err(error) => {
                warn!(
                    path = %path.display(),
                    %error,
                    "unmapped file unreadable from disk, emitting empty coverage"
                );
                CoverageMapEntry::new(path)
            }
        }
    }
}

/// Line-level coverage for text that needs no mapping and no wrapper
/// correction.
fn entry_from_plain_text(raw: &RawScriptCoverage, path: &Path, text: &str) -> CoverageMapEntry {
    let index = LineIndex::new(text);
    let mut entry = CoverageMapEntry::new(path);
    let mut line_hits: BTreeMap<u32, u64> = BTreeMap::new();

    for function in &raw.functions {
        record_plain_function(&mut entry, &index, function);
        for range in &function.ranges {
            let start = range.start_offset as usize;
            let end = range.end_offset as usize;
            if end <= start || start >= index.len() || end > index.len() {
                continue;
            }
            let (Some(start_loc), Some(end_loc)) =
                (index.location(start), index.location(end - 1))
            else {
                continue;
            };
            for line in start_loc.line..=end_loc.line {
                let slot = line_hits.entry(line).or_insert(0);
                *slot = (*slot).max(range.count);
            }
        }
    }

    for (line, count) in line_hits {
        entry.record_line(line, count);
    }
    entry
}

fn record_plain_function(entry: &mut CoverageMapEntry, index: &LineIndex, func: &FunctionCoverage) {
    let Some(outer) = func.ranges.first() else {
        return;
    };
    let Some(loc) = index.location(outer.start_offset as usize) else {
        return;
    };
    entry.record_function(
        FunctionKey {
            line: loc.line,
            name: func.function_name.clone(),
        },
        outer.count,
    );
}

/// Original-file length in lines, for bounds checking.
///
/// Prefers the source text embedded in the map; falls back to reading the
/// original from disk; when both are unavailable the bounds check is
/// skipped (and downstream consumers simply get no `sources_content`).
fn original_line_count(record: &TransformRecord, map: &SourceMap) -> Option<u32> {
    if let Some(embedded) = map.embedded_source() {
        return Some(line_count(embedded));
    }
    std::fs::read_to_string(&record.path)
        .ok()
        .map(|text| line_count(&text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::CoverageRange;
    use crate::transform::TransformRecord;

    fn raw(url: &str, ranges: Vec<CoverageRange>) -> RawScriptCoverage {
        RawScriptCoverage {
            script_id: "1".to_string(),
            url: url.to_string(),
            functions: vec![FunctionCoverage {
                function_name: "main".to_string(),
                ranges,
                is_block_coverage: true,
            }],
        }
    }

    /// Ten lines, 115 characters total: nine 12-character lines (newline
    /// included) plus a 7-character last line without a trailing newline.
    fn ten_line_code() -> String {
        let mut code = String::new();
        for i in 0..9 {
            code.push_str(&format!("const a{i}=10\n"));
        }
        code.push_str("x=00042");
        assert_eq!(code.len(), 115);
        code
    }

    fn record_with_identity_map(path: &str, code: &str, original: &str) -> TransformRecord {
        let mut map = SourceMap::identity(line_count(code).max(1));
        map.sources = vec![path.to_string()];
        map.sources_content = vec![Some(original.to_string())];
        TransformRecord::new(path, code).with_source_map(map)
    }

    #[test]
    fn wrapper_offset_applied_exactly_once() {
        // Scenario: math.ts transformed with a 185-character wrapper ahead
        // of it; a raw range [185, 300) with count 3 lands on transformed
        // offsets [0, 115).
        let code = ten_line_code();
        let original: String = code.clone();
        let record = record_with_identity_map("/src/math.ts", &code, &original);
        let mut registry = TransformRegistry::new();
        registry.insert(record);

        let reconciler = Reconciler::new(HarnessWrapping::node_vm());
        assert_eq!(reconciler.wrapping().offset(), 185);

        let entry = reconciler
            .reconcile(
                &raw(
                    "file:///src/math.ts",
                    vec![CoverageRange {
                        start_offset: 185,
                        end_offset: 300,
                        count: 3,
                    }],
                ),
                &registry,
            )
            .unwrap();

        // Offsets [0, 115) span lines 1..=10 of the transformed text; the
        // identity map carries each to the same original line.
        assert_eq!(entry.lines.len(), 10);
        for line in 1..=10 {
            assert_eq!(entry.lines[&line], 3, "line {line}");
        }
        assert_eq!(
            entry.functions[&FunctionKey {
                line: 1,
                name: "main".to_string()
            }],
            3
        );
    }

    #[test]
    fn out_of_bounds_offsets_are_rejected_not_clamped() {
        let code = ten_line_code();
        let record = record_with_identity_map("/src/math.ts", &code, &code);
        let mut registry = TransformRegistry::new();
        registry.insert(record);

        let reconciler = Reconciler::new(HarnessWrapping::node_vm());
        let entry = reconciler
            .reconcile(
                &raw(
                    "file:///src/math.ts",
                    vec![CoverageRange {
                        start_offset: 185,
                        end_offset: 185 + 2000, // far past the transformed text
                        count: 1,
                    }],
                ),
                &registry,
            )
            .unwrap();

        assert!(entry.lines.is_empty());
        assert!(entry.statements.is_empty());
    }

    #[test]
    fn mapped_location_beyond_original_bounds_is_dropped() {
        let code = ten_line_code();
        // Map claims the last transformed lines come from line 50 of a
        // two-line original: those resolutions are out of bounds.
        let mut map = SourceMap::new();
        map.push(crate::sourcemap::SourceMapping {
            generated_line: 1,
            generated_column: 0,
            original_line: 50,
            original_column: 0,
        });
        map.sources_content = vec![Some("line one\nline two\n".to_string())];
        let record = TransformRecord::new("/src/short.ts", code).with_source_map(map);
        let mut registry = TransformRegistry::new();
        registry.insert(record);

        let reconciler = Reconciler::new(HarnessWrapping::node_vm());
        let entry = reconciler
            .reconcile(
                &raw(
                    "file:///src/short.ts",
                    vec![CoverageRange {
                        start_offset: 185,
                        end_offset: 195,
                        count: 2,
                    }],
                ),
                &registry,
            )
            .unwrap();

        assert!(entry.lines.is_empty());
        assert!(entry.functions.is_empty());
    }

    #[test]
    fn range_entirely_inside_wrapper_is_skipped() {
        let code = ten_line_code();
        let record = record_with_identity_map("/src/math.ts", &code, &code);
        let mut registry = TransformRegistry::new();
        registry.insert(record);

        let reconciler = Reconciler::new(HarnessWrapping::node_vm());
        let entry = reconciler
            .reconcile(
                &raw(
                    "file:///src/math.ts",
                    vec![CoverageRange {
                        start_offset: 0,
                        end_offset: 100, // never leaves the prelude
                        count: 9,
                    }],
                ),
                &registry,
            )
            .unwrap();

        assert!(entry.lines.is_empty());
    }

    #[test]
    fn missing_source_map_skips_offset_correction() {
        let code = "one\ntwo\nthree\n";
        let record = TransformRecord::new("/src/plain.ts", code);
        let mut registry = TransformRegistry::new();
        registry.insert(record);

        let reconciler = Reconciler::new(HarnessWrapping::node_vm());
        let entry = reconciler
            .reconcile(
                &raw(
                    "file:///src/plain.ts",
                    vec![CoverageRange {
                        start_offset: 0,
                        end_offset: 7, // offsets against the unwrapped text
                        count: 1,
                    }],
                ),
                &registry,
            )
            .unwrap();

        assert_eq!(entry.lines.get(&1), Some(&1));
        assert_eq!(entry.lines.get(&2), Some(&1));
        assert_eq!(entry.lines.get(&3), None);
    }

    #[test]
    fn unmapped_and_unreadable_file_yields_empty_entry() {
        // No transform record and nothing on disk: zero mapped positions,
        // run continues.
        let registry = TransformRegistry::new();
        let reconciler = Reconciler::new(HarnessWrapping::node_vm());

        let entry = reconciler
            .reconcile(
                &raw(
                    "file:///definitely/not/on/disk.ts",
                    vec![CoverageRange {
                        start_offset: 0,
                        end_offset: 10,
                        count: 1,
                    }],
                ),
                &registry,
            )
            .unwrap();

        assert!(entry.is_empty());
        assert_eq!(entry.path, std::path::PathBuf::from("/definitely/not/on/disk.ts"));
    }

    #[test]
    fn unmapped_file_recovers_line_coverage_from_disk() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "alpha\nbeta\ngamma\n").unwrap();
        let url = format!("file://{}", file.path().display());

        let registry = TransformRegistry::new();
        let reconciler = Reconciler::new(HarnessWrapping::node_vm());
        let entry = reconciler
            .reconcile(
                &raw(
                    &url,
                    vec![CoverageRange {
                        start_offset: 0,
                        end_offset: 9,
                        count: 2,
                    }],
                ),
                &registry,
            )
            .unwrap();

        assert_eq!(entry.lines.get(&1), Some(&2));
        assert_eq!(entry.lines.get(&2), Some(&2));
    }

    #[test]
    fn block_subranges_become_branch_arms() {
        let code = ten_line_code();
        let record = record_with_identity_map("/src/math.ts", &code, &code);
        let mut registry = TransformRegistry::new();
        registry.insert(record);

        let reconciler = Reconciler::new(HarnessWrapping::node_vm());
        let entry = reconciler
            .reconcile(
                &raw(
                    "file:///src/math.ts",
                    vec![
                        CoverageRange {
                            start_offset: 185,
                            end_offset: 300,
                            count: 3,
                        },
                        CoverageRange {
                            start_offset: 197,
                            end_offset: 208, // line 2 of the transform
                            count: 0,
                        },
                    ],
                ),
                &registry,
            )
            .unwrap();

        assert_eq!(entry.branches.len(), 1);
        let (key, count) = entry.branches.iter().next().unwrap();
        assert_eq!(key.arm, 0);
        assert_eq!(*count, 0);
        // The uncovered arm caps its line below the outer count.
        assert_eq!(entry.lines[&2], 3);
    }

    #[test]
    fn nested_ranges_do_not_double_count_lines() {
        let code = ten_line_code();
        let record = record_with_identity_map("/src/math.ts", &code, &code);
        let mut registry = TransformRegistry::new();
        registry.insert(record);

        let reconciler = Reconciler::new(HarnessWrapping::node_vm());
        let entry = reconciler
            .reconcile(
                &raw(
                    "file:///src/math.ts",
                    vec![
                        CoverageRange {
                            start_offset: 185,
                            end_offset: 300,
                            count: 3,
                        },
                        CoverageRange {
                            start_offset: 185,
                            end_offset: 196, // line 1 again, higher count
                            count: 7,
                        },
                    ],
                ),
                &registry,
            )
            .unwrap();

        // Max, not sum: 7 for line 1, outer 3 elsewhere.
        assert_eq!(entry.lines[&1], 7);
        assert_eq!(entry.lines[&2], 3);
    }
}
