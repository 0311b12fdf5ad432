//! Source map model and position resolution.
//!
//! The transform pipeline supplies, per file, a decoded source map: an
//! ordered list of (generated position → original position) mappings,
//! optionally embedding the original source text. Lookup follows source-map
//! convention: a generated position resolves through the greatest mapping at
//! or before it.
//!
//! [`LineIndex`] converts character offsets in transformed text into
//! line/column positions, since the profiler reports offsets while source
//! maps speak lines and columns.

use crate::map::SourceLocation;
use serde::{Deserialize, Serialize};

/// One decoded mapping from a generated position to an original position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMapping {
    /// Generated line (1-indexed)
    pub generated_line: u32,
    /// Generated column (0-indexed)
    pub generated_column: u32,
    /// Original line (1-indexed)
    pub original_line: u32,
    /// Original column (0-indexed)
    pub original_column: u32,
}

/// Decoded source map for one transformed file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMap {
    /// Mappings ordered by generated position
    pub mappings: Vec<SourceMapping>,
    /// Original source paths (single-source maps in practice)
    pub sources: Vec<String>,
    /// Original source text, when the transform embedded it
    pub sources_content: Vec<Option<String>>,
}

impl SourceMap {
    /// Create an empty source map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mapping (keeps insertion order; callers insert sorted)
    pub fn push(&mut self, mapping: SourceMapping) {
        self.mappings.push(mapping);
    }

    /// Resolve a generated position to an original position.
    ///
    /// Returns the mapping with the greatest generated position at or
    /// before the query, or `None` when the position precedes every
    /// mapping.
    #[must_use]
    pub fn lookup(&self, generated: SourceLocation) -> Option<&SourceMapping> {
        self.mappings
            .iter()
            .filter(|m| {
                (m.generated_line, m.generated_column) <= (generated.line, generated.column)
            })
            .max_by_key(|m| (m.generated_line, m.generated_column))
    }

    /// Embedded original source text, when present
    #[must_use]
    pub fn embedded_source(&self) -> Option<&str> {
        self.sources_content.first()?.as_deref()
    }

    /// Identity map for `line_count` lines: line N maps to line N.
    ///
    /// Matches transforms that only append code or rewrite within lines.
    #[must_use]
    pub fn identity(line_count: u32) -> Self {
        let mappings = (1..=line_count)
            .map(|line| SourceMapping {
                generated_line: line,
                generated_column: 0,
                original_line: line,
                original_column: 0,
            })
            .collect();
        Self {
            mappings,
            sources: Vec::new(),
            sources_content: Vec::new(),
        }
    }
}

/// Offset → line/column index over a fixed text
#[derive(Debug, Clone)]
pub struct LineIndex {
    /// Byte offset of each line start
    line_starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    /// Build the index for a text
    #[must_use]
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        for (idx, byte) in text.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(idx + 1);
            }
        }
        Self {
            line_starts,
            len: text.len(),
        }
    }

    /// Length of the indexed text
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the indexed text is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of lines in the indexed text
    #[must_use]
    pub fn line_count(&self) -> u32 {
        self.line_starts.len() as u32
    }

    /// Resolve an offset to a line/column position.
    ///
    /// Returns `None` for offsets past the end of the text; out-of-range
    /// offsets are a reconciliation bug and must be rejected, not clamped.
    #[must_use]
    pub fn location(&self, offset: usize) -> Option<SourceLocation> {
        if offset >= self.len {
            return None;
        }
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        Some(SourceLocation {
            line: (line_idx + 1) as u32,
            column: (offset - self.line_starts[line_idx]) as u32,
        })
    }
}

/// Count the lines of a source text the way reports do (trailing newline
/// does not open a new line)
#[must_use]
pub fn line_count(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    let trailing = usize::from(text.ends_with('\n'));
    (text.matches('\n').count() + 1 - trailing) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_picks_greatest_mapping_at_or_before() {
        let map = SourceMap::identity(10);
        let hit = map.lookup(SourceLocation::new(3, 7)).unwrap();
        assert_eq!(hit.original_line, 3);

        let exact = map.lookup(SourceLocation::new(5, 0)).unwrap();
        assert_eq!(exact.original_line, 5);
    }

    #[test]
    fn lookup_before_first_mapping_is_none() {
        let mut map = SourceMap::new();
        map.push(SourceMapping {
            generated_line: 4,
            generated_column: 0,
            original_line: 2,
            original_column: 0,
        });
        assert!(map.lookup(SourceLocation::new(1, 0)).is_none());
    }

    #[test]
    fn lookup_empty_map_is_none() {
        let map = SourceMap::new();
        assert!(map.lookup(SourceLocation::new(1, 0)).is_none());
    }

    #[test]
    fn embedded_source_prefers_first_entry() {
        let map = SourceMap {
            mappings: Vec::new(),
            sources: vec!["/src/math.ts".to_string()],
            sources_content: vec![Some("let x = 1\n".to_string())],
        };
        assert_eq!(map.embedded_source(), Some("let x = 1\n"));
        assert_eq!(SourceMap::new().embedded_source(), None);
    }

    #[test]
    fn line_index_resolves_offsets() {
        let index = LineIndex::new("ab\ncde\nf");
        assert_eq!(index.location(0), Some(SourceLocation::new(1, 0)));
        assert_eq!(index.location(1), Some(SourceLocation::new(1, 1)));
        assert_eq!(index.location(3), Some(SourceLocation::new(2, 0)));
        assert_eq!(index.location(5), Some(SourceLocation::new(2, 2)));
        assert_eq!(index.location(7), Some(SourceLocation::new(3, 0)));
        assert_eq!(index.line_count(), 3);
    }

    #[test]
    fn line_index_rejects_out_of_range() {
        let index = LineIndex::new("abc");
        assert!(index.location(3).is_none());
        assert!(index.location(100).is_none());
    }

    #[test]
    fn line_index_newline_belongs_to_its_line() {
        let index = LineIndex::new("a\nb\n");
        assert_eq!(index.location(1), Some(SourceLocation::new(1, 1)));
    }

    #[test]
    fn line_count_ignores_trailing_newline() {
        assert_eq!(line_count(""), 0);
        assert_eq!(line_count("a"), 1);
        assert_eq!(line_count("a\n"), 1);
        assert_eq!(line_count("a\nb"), 2);
        assert_eq!(line_count("a\nb\n"), 2);
    }
}
