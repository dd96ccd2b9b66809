//! Coordinator errors.

use thiserror::Error;

use imgrelay_client::RemoteError;
use imgrelay_core::ParseError;

/// Errors returned by [`crate::TaskLifecycleCoordinator`] operations.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The source (or override target) reference is not valid.
    #[error("validation error: {0}")]
    Validation(#[from] ParseError),

    /// No usable destination registry.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The remote task service failed the request.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The coordinator has been shut down.
    #[error("coordinator is shut down")]
    ShutDown,
}
