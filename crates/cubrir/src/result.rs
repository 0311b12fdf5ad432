//! Result and error types for Cubrir.

use crate::threshold::ThresholdFailure;
use thiserror::Error;

/// Result type for Cubrir operations
pub type CubrirResult<T> = Result<T, CubrirError>;

/// Errors that can occur in Cubrir
#[derive(Debug, Error)]
pub enum CubrirError {
    /// Operation attempted after the coverage session was torn down.
    ///
    /// Fatal to that session only; the run continues with empty coverage
    /// for the exhausted execution context.
    #[error("Coverage session is closed")]
    SessionClosed,

    /// Session operation issued in a state that cannot serve it
    #[error("Coverage session protocol error: {message}")]
    SessionProtocol {
        /// Error message
        message: String,
    },

    /// Profiler transport failure (request/response round-trip failed)
    #[error("Profiler transport error for '{command}': {message}")]
    Transport {
        /// Profiler command that failed
        command: String,
        /// Error message
        message: String,
    },

    /// No transform record was found for an executed file
    #[error("No transform record for {path}")]
    UnmappedSource {
        /// Normalized path of the executed file
        path: String,
    },

    /// A coverage offset resolved outside the bounds of its source
    #[error("Coverage offset {offset} out of bounds for {path} (source length {length})")]
    MalformedCoverageOffset {
        /// File the offset belongs to
        path: String,
        /// Offending offset
        offset: usize,
        /// Length of the source the offset was checked against
        length: usize,
    },

    /// Aggregated coverage fell below the configured minimums
    #[error("Coverage thresholds not met: {} metric(s) below minimum", .failures.len())]
    ThresholdNotMet {
        /// One entry per (metric, scope) that failed the gate
        failures: Vec<ThresholdFailure>,
    },

    /// A configured coverage provider could not be resolved or initialized.
    ///
    /// Fatal to the whole run; surfaced before any tests execute.
    #[error("Failed to load coverage provider '{name}': {message}")]
    ProviderLoadFailure {
        /// Configured provider name
        name: String,
        /// Error message
        message: String,
    },

    /// Invalid coverage configuration
    #[error("Invalid coverage configuration: {message}")]
    InvalidConfig {
        /// Error message
        message: String,
    },

    /// Filesystem error while cleaning or writing reports
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON payload or configuration document
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
