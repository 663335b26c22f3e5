//! Error taxonomy for the push-sync engine.
//!
//! Errors are classified by how far they propagate: configuration and
//! authentication errors abort the whole job before any user is touched,
//! not-found and creation errors fail the current user only, and facet
//! errors are caught at the facet call site and never escalate.

use thiserror::Error;

use crate::facet::Facet;

/// Result alias used throughout the crate.
pub type SyncResult<T> = Result<T, SyncError>;

/// Error that can occur while reconciling users against the remote service.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Job configuration is missing or invalid. Fatal to the whole job;
    /// the job never starts.
    #[error("invalid job configuration: {0}")]
    Config(String),

    /// The remote service rejected the client credentials or the session
    /// token. Fatal to the whole job when raised at login.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A mapped remote account no longer exists. Fatal to the current user
    /// only; the engine never auto-recreates a mapped account.
    #[error("remote account {id} not found: {body}")]
    RemoteNotFound { id: i64, body: String },

    /// A facet API call did not confirm the intended change. Caught at the
    /// facet invocation site and logged; never escalates past the facet.
    #[error("{facet} sync failed: {message}")]
    Facet { facet: Facet, message: String },

    /// The create call returned no identifier. Fatal to the current user;
    /// no mapping is persisted for a nonexistent account.
    #[error("account creation returned no identifier: {body}")]
    CreationFailed { body: String },

    /// Non-2xx response from the remote service, carrying the raw body
    /// for diagnostics.
    #[error("remote API error (HTTP {status}): {body}")]
    Api { status: u16, body: String },

    /// Transport-level failure (connection, timeout, TLS).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Response body could not be decoded.
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// A mapping already exists for the same key. Duplicate creation is a
    /// programming error, not a retryable condition.
    #[error("mapping already exists for {key}")]
    DuplicateMapping { key: String },

    /// Mapping store failure.
    #[error("mapping store error: {0}")]
    Store(String),
}

impl SyncError {
    /// Whether this error aborts the whole job rather than the current user.
    #[must_use]
    pub fn is_fatal_for_job(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Auth(_))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
