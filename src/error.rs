//! Error types.
//!
//! [`ScanError`] covers failures that surface to the caller. [`RemoteError`]
//! is what a single remote lookup can fail with; the batch matcher decides
//! from it whether to retry, and never lets it escape a batch.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// A policy file exists but cannot be read or parsed.
    #[error("configuration error: {path}: {reason}")]
    Configuration { path: PathBuf, reason: String },

    #[error("invalid matcher config: {field}: {reason}")]
    InvalidMatcherConfig { field: &'static str, reason: String },

    /// A programming error detected at runtime.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("io error: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// Network failure, server error or rate limiting.
    #[error("transient remote error: {0}")]
    Transient(String),

    /// Any other client error, or a response that could not be decoded.
    #[error("permanent remote error: {0}")]
    Permanent(String),
}

impl RemoteError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }

    /// Classifies an HTTP status that is not a success.
    pub fn from_status(status: u16, context: &str) -> Self {
        if is_retryable_http(status) {
            RemoteError::Transient(format!("{context}: HTTP {status}"))
        } else {
            RemoteError::Permanent(format!("{context}: HTTP {status}"))
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return RemoteError::from_status(status.as_u16(), "request failed");
        }
        if err.is_decode() || err.is_builder() {
            return RemoteError::Permanent(err.to_string());
        }
        // Everything else happened on the wire.
        RemoteError::Transient(err.to_string())
    }
}

/// Retryable statuses: rate limiting and every server error.
pub fn is_retryable_http(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Reports a broken internal invariant.
///
/// Debug builds panic so the bug is caught in tests; release builds log the
/// violation and let the scan continue with best-effort output.
pub(crate) fn invariant_violation(message: String) {
    debug_assert!(false, "{}", ScanError::InvariantViolation(message.clone()));
    tracing::error!("{}", ScanError::InvariantViolation(message));
}
