//! Raw profiler payload model.
//!
//! These types mirror the precise-coverage wire shape of the runtime
//! profiler (`Profiler.takePreciseCoverage`): one entry per executed
//! script, each holding an ordered sequence of function records with
//! byte-offset ranges and call counts. Offsets are measured against the
//! wrapped code the runtime actually executed, not the original source.

use serde::{Deserialize, Serialize};

/// A range of characters in an executed script that was covered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageRange {
    /// Start offset (inclusive)
    pub start_offset: u32,
    /// End offset (exclusive)
    pub end_offset: u32,
    /// Number of times this range was executed
    pub count: u64,
}

/// Precise coverage data for a single function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCoverage {
    /// Function name (may be empty for anonymous functions)
    pub function_name: String,
    /// Ranges within this function that were measured.
    ///
    /// The first range spans the whole function; with detailed (block)
    /// coverage the remaining ranges are nested block sub-ranges.
    pub ranges: Vec<CoverageRange>,
    /// Whether block-level granularity was recorded
    pub is_block_coverage: bool,
}

impl FunctionCoverage {
    /// Check if the function was executed at least once
    #[must_use]
    pub fn was_executed(&self) -> bool {
        self.ranges.iter().any(|r| r.count > 0)
    }

    /// Call count of the function itself (the outermost range)
    #[must_use]
    pub fn call_count(&self) -> u64 {
        self.ranges.first().map_or(0, |r| r.count)
    }
}

/// Coverage data for a single executed script, as seen by the profiler.
///
/// The URL is the runtime's view of the module (a `file://` URL or a
/// served-page URL), not necessarily the original file path. Immutable
/// once captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawScriptCoverage {
    /// Script identifier assigned by the runtime
    pub script_id: String,
    /// Source URL as reported by the runtime
    pub url: String,
    /// Per-function coverage records, in script order
    pub functions: Vec<FunctionCoverage>,
}

impl RawScriptCoverage {
    /// Count functions that were executed at least once
    #[must_use]
    pub fn functions_executed(&self) -> usize {
        self.functions.iter().filter(|f| f.was_executed()).count()
    }
}

/// Payload of one `take()` call: the accumulated script coverage set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeCoverageResult {
    /// One entry per executed script that survived filtering
    pub result: Vec<RawScriptCoverage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(url: &str, ranges: Vec<CoverageRange>) -> RawScriptCoverage {
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

    #[test]
    fn function_call_count_is_outermost_range() {
        let func = FunctionCoverage {
            function_name: "f".to_string(),
            ranges: vec![
                CoverageRange {
                    start_offset: 0,
                    end_offset: 100,
                    count: 4,
                },
                CoverageRange {
                    start_offset: 10,
                    end_offset: 20,
                    count: 0,
                },
            ],
            is_block_coverage: true,
        };
        assert_eq!(func.call_count(), 4);
        assert!(func.was_executed());
    }

    #[test]
    fn empty_ranges_never_executed() {
        let func = FunctionCoverage {
            function_name: String::new(),
            ranges: vec![],
            is_block_coverage: false,
        };
        assert_eq!(func.call_count(), 0);
        assert!(!func.was_executed());
    }

    #[test]
    fn functions_executed_counts_hit_functions() {
        let raw = script(
            "file:///src/math.ts",
            vec![CoverageRange {
                start_offset: 0,
                end_offset: 50,
                count: 0,
            }],
        );
        assert_eq!(raw.functions_executed(), 0);
    }

    #[test]
    fn wire_shape_is_camel_case() {
        let raw = script(
            "file:///src/math.ts",
            vec![CoverageRange {
                start_offset: 5,
                end_offset: 10,
                count: 2,
            }],
        );
        let json = serde_json::to_value(&raw).unwrap();
        assert_eq!(json["scriptId"], "1");
        assert_eq!(json["functions"][0]["isBlockCoverage"], true);
        assert_eq!(json["functions"][0]["ranges"][0]["startOffset"], 5);
    }

    #[test]
    fn take_result_round_trips() {
        let take = TakeCoverageResult {
            result: vec![script(
                "file:///a.ts",
                vec![CoverageRange {
                    start_offset: 0,
                    end_offset: 1,
                    count: 1,
                }],
            )],
        };
        let json = serde_json::to_string(&take).unwrap();
        let back: TakeCoverageResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, take);
    }
}
