//! Error types for the policy module.

use thiserror::Error;

use mend_core::Checkpoint;

/// Result type alias for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;

/// Errors that can occur while applying policy.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Decision '{decision}' does not apply to checkpoint {checkpoint}")]
    InvalidDecision {
        checkpoint: Checkpoint,
        decision: String,
    },

    #[error("Expected {expected} answers, got {found}")]
    AnswerCount { expected: usize, found: usize },

    #[error("Core error: {0}")]
    Core(#[from] mend_core::CoreError),
}
