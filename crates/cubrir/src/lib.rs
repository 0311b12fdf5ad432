//! Cubrir: Coverage Collection for Isolated Test Executions
//!
//! Cubrir (Spanish: "to cover") collects execution coverage from test runs
//! that execute transformed code in isolated workers and browser pages,
//! reconciles it back onto the originally-authored sources, and renders
//! reports with threshold enforcement.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     CUBRIR Architecture                          │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌────────────┐   ┌────────────┐   ┌──────────┐  │
//! │  │ Profiler  │   │ Reconciler │   │ Aggregator │   │ Reports  │  │
//! │  │ Session / │──►│ (source    │──►│ (merge per │──►│ + Thresh │  │
//! │  │ Counters  │   │  maps)     │   │  batch)    │   │  olds    │  │
//! │  └───────────┘   └────────────┘   └────────────┘   └──────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Raw coverage is measured against the wrapped, transformed code the
//! runtime actually executed; everything downstream of reconciliation is
//! keyed by original source positions.

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]
#![cfg_attr(test, allow(clippy::large_stack_arrays, clippy::large_stack_frames))]

pub mod aggregate;
pub mod config;
pub mod map;
pub mod provider;
pub mod reconcile;
pub mod report;
pub mod result;
pub mod script;
pub mod session;
pub mod sourcemap;
pub mod threshold;
pub mod transform;
pub mod wrapping;

pub use aggregate::{Aggregator, CoverageBatch, UrlRewriteRule};
pub use config::{
    resolve_options, CoverageOptions, FileMatcher, ProviderKind, ResolvedCoverageOptions,
};
pub use map::{CoverageMap, CoverageMapEntry, CoverageSummary, SourceLocation, SourceRange};
pub use provider::{
    resolve_provider, CoverageProvider, CoveragePayload, ExecutionMeta, ExecutionOrigin,
    HitCountStore, InstrumentationProvider, InstrumentationSnapshot, NativeProvider,
    ProviderContext, ReportContext,
};
pub use reconcile::Reconciler;
pub use report::{JsonSummaryWriter, LcovWriter, ReportWriter, TextWriter};
pub use result::{CubrirError, CubrirResult};
pub use script::{CoverageRange, FunctionCoverage, RawScriptCoverage};
pub use session::{CoverageSession, ProfilerTransport, SessionState, UrlFilter};
pub use sourcemap::{LineIndex, SourceMap, SourceMapping};
pub use threshold::{
    update_stored_thresholds, Metric, ThresholdEnforcer, ThresholdFailure, ThresholdSpec,
};
pub use transform::{TransformRecord, TransformRegistry};
pub use wrapping::HarnessWrapping;
