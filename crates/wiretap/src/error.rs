//! Error types for the capture/replay engine.

use std::path::PathBuf;

/// Boxed error used at pluggable seams (comparators, streaming bodies).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A submitted call that has not completed yet, as reported by the export guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCall {
    pub identity: u64,
    pub method: String,
    pub url: String,
}

impl std::fmt::Display for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} {} {}", self.identity, self.method, self.url)
    }
}

fn format_pending(pending: &[PendingCall]) -> String {
    pending
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Error types for capture and replay.
///
/// Call-scoped errors ([`Error::NoMockForIdentity`], [`Error::ComparatorMismatch`])
/// are delivered on the failing call's own reply channel and never escape to the
/// engine's callers. Session- and configuration-scoped errors are returned from
/// the operation that triggered them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad environment value or engine misuse, surfaced before interception begins.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Missing or malformed fixture file, fatal for the session that loaded it.
    #[error("failed to load fixture {}: {reason}", .path.display())]
    FixtureLoad { path: PathBuf, reason: String },

    /// The fixture has no entry at this call's position.
    #[error("no recorded mock at position {0}")]
    NoMockForIdentity(u64),

    /// The replayed request diverged from its fixture entry.
    #[error("call {identity} does not match its recorded mock: {reason}")]
    ComparatorMismatch { identity: u64, reason: String },

    /// Export attempted while calls were still in flight.
    #[error("{} call(s) still in flight: {}", .pending.len(), format_pending(.pending))]
    IncompleteCapture { pending: Vec<PendingCall> },

    /// Completion reported for an identity with no in-flight entry.
    #[error("no in-flight call with identity {0}")]
    MissingInFlight(u64),

    /// The inbound request body stream failed before it ended.
    #[error("failed to read request body: {0}")]
    Body(String),

    /// A recorded response could not be rebuilt into an HTTP response.
    #[error("failed to build response: {0}")]
    Response(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
