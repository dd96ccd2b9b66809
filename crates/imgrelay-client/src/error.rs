//! Error types for the task service client.

use thiserror::Error;

/// Errors reported by the remote task service or the transport to it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Unknown task id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation not allowed in the task's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Service could not be reached.
    #[error("service unreachable: {0}")]
    Unreachable(String),

    /// Session is no longer valid; the caller must re-authenticate.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Service rejected the request payload.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Response could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl RemoteError {
    /// Returns true for authentication failures, which stop polling.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Protocol(err.to_string())
        } else {
            Self::Unreachable(err.to_string())
        }
    }
}
