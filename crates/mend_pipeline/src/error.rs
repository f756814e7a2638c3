//! Error types for the pipeline crate.

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors that stop the orchestrator itself, as opposed to a run outcome.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Agent error: {0}")]
    Agent(#[from] mend_agents::AgentError),

    #[error("Core error: {0}")]
    Core(#[from] mend_core::CoreError),

    #[error("Policy error: {0}")]
    Policy(#[from] mend_policy::PolicyError),

    #[error("Handoff failed: {0}")]
    Handoff(String),

    #[error("Test run failed: {0}")]
    TestRun(String),

    #[error("Unsafe path in change set: {0}")]
    UnsafePath(String),

    #[error("Run {0} cannot be resumed: {1}")]
    NotResumable(String, String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
