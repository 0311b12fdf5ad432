//! Precise-coverage session against the runtime profiler.
//!
//! A [`CoverageSession`] is a thin stateful wrapper over a profiler
//! transport: `connect`, request/response `post`, `disconnect`. Lifecycle
//! is uninitialized → connected → collecting → stopped. Every operation is
//! an asynchronous round-trip to an out-of-process (or same-process
//! privileged) profiler, and the transport handle is not reentrant: the
//! `&mut self` receivers serialize `start`/`take`/`stop` per session, so no
//! two protocol calls can be in flight at once.
//!
//! Exactly one session is expected per execution context (worker or
//! browser realm).

use crate::result::{CubrirError, CubrirResult};
use crate::script::{RawScriptCoverage, TakeCoverageResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

/// Request/response transport to the runtime profiler
#[async_trait]
pub trait ProfilerTransport: Send {
    /// Open the transport
    async fn connect(&mut self) -> CubrirResult<()>;

    /// Issue a profiler command and await its result
    async fn post(&mut self, command: &str, params: Option<Value>) -> CubrirResult<Value>;

    /// Release the transport handle
    async fn disconnect(&mut self) -> CubrirResult<()>;
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport not yet connected
    Uninitialized,
    /// Connected, collection not started
    Connected,
    /// Precise coverage collection running
    Collecting,
    /// Torn down; the handle has been released
    Stopped,
}

/// Early filter over raw coverage URLs.
///
/// Dropping entries here only trims the payload crossing the process
/// boundary; it is a performance optimization, not a correctness
/// requirement. The predicate stays conservative because a false positive
/// (dropping a file we were responsible for) is unrecoverable, while a
/// false negative is merely wasteful.
#[derive(Debug, Clone)]
pub struct UrlFilter {
    vendored_markers: Vec<String>,
    internal_markers: Vec<String>,
}

impl Default for UrlFilter {
    fn default() -> Self {
        Self {
            vendored_markers: vec!["/node_modules/".to_string()],
            internal_markers: vec!["__harness__".to_string()],
        }
    }
}

impl UrlFilter {
    /// Filter with additional vendored-directory markers
    #[must_use]
    pub fn with_vendored_marker(mut self, marker: impl Into<String>) -> Self {
        self.vendored_markers.push(marker.into());
        self
    }

    /// Filter with additional harness-internal URL markers
    #[must_use]
    pub fn with_internal_marker(mut self, marker: impl Into<String>) -> Self {
        self.internal_markers.push(marker.into());
        self
    }

    /// Decide whether a raw entry's URL is worth shipping
    #[must_use]
    pub fn keep(&self, url: &str) -> bool {
        let recognized_scheme = url.starts_with("file://")
            || url.starts_with("http://")
            || url.starts_with("https://");
        if !recognized_scheme {
            return false;
        }
        if self.vendored_markers.iter().any(|m| url.contains(m.as_str())) {
            return false;
        }
        if self.internal_markers.iter().any(|m| url.contains(m.as_str())) {
            return false;
        }
        true
    }
}

/// Stateful precise-coverage session over a profiler transport
pub struct CoverageSession {
    transport: Box<dyn ProfilerTransport>,
    state: SessionState,
    filter: UrlFilter,
}

impl std::fmt::Debug for CoverageSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoverageSession")
            .field("state", &self.state)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl CoverageSession {
    /// Create a session over a transport
    #[must_use]
    pub fn new(transport: Box<dyn ProfilerTransport>) -> Self {
        Self {
            transport,
            state: SessionState::Uninitialized,
            filter: UrlFilter::default(),
        }
    }

    /// Replace the URL filter
    #[must_use]
    pub fn with_filter(mut self, filter: UrlFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Enable the profiler and begin precise collection.
    ///
    /// Idempotent: calling while already collecting is a no-op. Collection
    /// uses per-call-count and per-block ("detailed") granularity.
    pub async fn start(&mut self) -> CubrirResult<()> {
        match self.state {
            SessionState::Collecting => return Ok(()),
            SessionState::Stopped => return Err(CubrirError::SessionClosed),
            SessionState::Uninitialized => {
                self.transport.connect().await?;
                self.state = SessionState::Connected;
            }
            SessionState::Connected => {}
        }

        debug!("enabling profiler and starting precise coverage");
        let _ = self.transport.post("Profiler.enable", None).await?;
        let _ = self
            .transport
            .post(
                "Profiler.startPreciseCoverage",
                Some(json!({ "callCount": true, "detailed": true })),
            )
            .await?;
        self.state = SessionState::Collecting;
        Ok(())
    }

    /// Return the accumulated coverage set.
    ///
    /// Callable repeatedly; each call sees cumulative counts unless the
    /// session is stopped and restarted. Entries failing the URL filter are
    /// dropped before crossing the process boundary.
    pub async fn take(&mut self) -> CubrirResult<Vec<RawScriptCoverage>> {
        match self.state {
            SessionState::Collecting => {}
            SessionState::Stopped => return Err(CubrirError::SessionClosed),
            SessionState::Uninitialized | SessionState::Connected => {
                return Err(CubrirError::SessionProtocol {
                    message: "take() called before start()".to_string(),
                })
            }
        }

        let value = self
            .transport
            .post("Profiler.takePreciseCoverage", None)
            .await?;
        let take: TakeCoverageResult = serde_json::from_value(value)?;

        let kept: Vec<RawScriptCoverage> = take
            .result
            .into_iter()
            .filter(|script| self.filter.keep(&script.url))
            .collect();
        debug!(scripts = kept.len(), "took precise coverage");
        Ok(kept)
    }

    /// Disable collection and release the transport handle.
    ///
    /// Idempotent once stopped. After `stop()`, `take()` fails with
    /// [`CubrirError::SessionClosed`].
    pub async fn stop(&mut self) -> CubrirResult<()> {
        match self.state {
            SessionState::Stopped => return Ok(()),
            SessionState::Uninitialized => {
                self.state = SessionState::Stopped;
                return Ok(());
            }
            SessionState::Collecting => {
                let _ = self
                    .transport
                    .post("Profiler.stopPreciseCoverage", None)
                    .await?;
                let _ = self.transport.post("Profiler.disable", None).await?;
            }
            SessionState::Connected => {}
        }

        self.transport.disconnect().await?;
        self.state = SessionState::Stopped;
        debug!("coverage session stopped");
        Ok(())
    }
}
