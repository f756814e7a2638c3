//! Error types for the agents crate.

use thiserror::Error;

use crate::invoker::InvocationFailure;
use crate::roles::AgentRole;
use crate::validator::SchemaError;

/// Result type alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors that can occur while preparing or running an agent call.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Unknown agent role: {0}")]
    UnknownRole(String),

    #[error("Information boundary violated for {role}: {message}")]
    BoundaryViolation { role: AgentRole, message: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Invocation(#[from] InvocationFailure),

    #[error("Prompt template error: {0}")]
    Template(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Create a boundary violation error.
    pub fn boundary(role: AgentRole, message: impl Into<String>) -> Self {
        Self::BoundaryViolation {
            role,
            message: message.into(),
        }
    }
}
