//! Core domain errors.

use thiserror::Error;

/// Errors produced while parsing an image reference.
///
/// Malformed input is always reported through this type; parsing never
/// panics on non-empty input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The reference was empty or whitespace only.
    #[error("image reference cannot be empty")]
    EmptyInput,

    /// The reference is structurally invalid.
    #[error("invalid image reference format: {0}")]
    InvalidFormat(String),

    /// The reference contains a character outside `[A-Za-z0-9._-/:]`.
    #[error("image reference contains illegal character '{0}'")]
    IllegalCharacter(char),
}

/// Core domain errors for imgrelay.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A task record breaks one of the status/timestamp invariants.
    #[error("Task {task_id} violates invariant: {reason}")]
    InvariantViolation { task_id: String, reason: String },

    /// Unknown task status value.
    #[error("Unknown task status: {0}")]
    UnknownStatus(String),

    /// Transfer step index outside 1..=7.
    #[error("Invalid transfer step: {0}")]
    InvalidStep(u8),
}
