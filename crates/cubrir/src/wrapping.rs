//! Harness code wrapping and the wrapper offset.
//!
//! The execution harness runs transformed user code inside the runtime by
//! prepending a synthetic prelude (module parameters, strict-mode pragma,
//! async wrapper). The profiler measures offsets against that wrapped text,
//! while the source map captured at transform time knows nothing about it.
//! The reconciler therefore has to shift every raw offset by the prelude
//! length exactly once before resolving positions.
//!
//! The offset is derived from the prelude text itself so that a harness
//! change cannot drift apart from the correction. This module is the single
//! owner of that text; the session side and the reconciler both consume the
//! same [`HarnessWrapping`] value.

/// Prelude the node-vm execution harness prepends to transformed code.
///
/// One line, so wrapped code keeps its line numbers shifted by exactly one
/// and character offsets shifted by the prelude length.
const NODE_VM_PRELUDE: &str = "'use strict'; async ( __harness_import__,__harness_dynamic_import__,__harness_exports__,__harness_export_all__,__harness_import_meta__,require,exports,module,__filename,__dirname) => {\n";

/// Description of how the execution harness wraps user code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessWrapping {
    prelude: String,
}

impl HarnessWrapping {
    /// Wrapping used by the node-vm harness
    #[must_use]
    pub fn node_vm() -> Self {
        Self {
            prelude: NODE_VM_PRELUDE.to_string(),
        }
    }

    /// No wrapping (e.g. served-page execution, where modules run as-is)
    #[must_use]
    pub fn none() -> Self {
        Self {
            prelude: String::new(),
        }
    }

    /// Wrapping with a custom prelude, for harnesses this crate does not know
    #[must_use]
    pub fn from_prelude(prelude: impl Into<String>) -> Self {
        Self {
            prelude: prelude.into(),
        }
    }

    /// The prelude text itself
    #[must_use]
    pub fn prelude(&self) -> &str {
        &self.prelude
    }

    /// Number of synthetic leading characters the harness injects.
    ///
    /// Subtract this from raw profiler offsets before source-map resolution.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.prelude.len()
    }

    /// Padding with the same length as the prelude.
    ///
    /// Prepended to transformed source text handed to offset-based
    /// consumers, so their offsets line up with what the profiler measured
    /// without leaking the prelude contents.
    #[must_use]
    pub fn padding(&self) -> String {
        ".".repeat(self.prelude.len())
    }
}

impl Default for HarnessWrapping {
    fn default() -> Self {
        Self::node_vm()
    }
}
