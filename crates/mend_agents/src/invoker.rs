//! Agent Invoker: one round trip to the completion service, then validation.
//!
//! The invoker never retries. A timeout or broken transport surfaces as a
//! [`FailureKind::Transport`] failure and a response that does not satisfy
//! the role schema surfaces as [`FailureKind::Schema`]; the orchestrator
//! decides what happens next.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::boundary::RoleInput;
use crate::contracts::{AgentOutput, RoleContract};
use crate::error::AgentResult;
use crate::prompt::{AgentRequest, PromptBook};
use crate::roles::AgentRole;
use crate::validator::{ContractValidator, SchemaError};

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Errors raised by a completion service transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("completion service unavailable: {0}")]
    Unavailable(String),

    #[error("completion process failed: {0}")]
    Process(String),

    #[error("malformed transport response: {0}")]
    Malformed(String),
}

/// The external completion service.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Service name for logs.
    fn name(&self) -> &str;

    /// Send one request and return the structured response object.
    async fn complete(&self, request: &AgentRequest) -> Result<Value, TransportError>;
}

/// Category of an invocation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transport,
    Schema,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transport => "transport",
            FailureKind::Schema => "schema",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A failed agent round trip.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{role} invocation failed ({kind}): {detail}")]
pub struct InvocationFailure {
    pub role: AgentRole,
    pub kind: FailureKind,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_error: Option<SchemaError>,
}

impl InvocationFailure {
    pub fn transport(role: AgentRole, detail: impl Into<String>) -> Self {
        Self {
            role,
            kind: FailureKind::Transport,
            detail: detail.into(),
            schema_error: None,
        }
    }

    pub fn schema(error: SchemaError) -> Self {
        Self {
            role: error.role,
            kind: FailureKind::Schema,
            detail: error.summary(),
            schema_error: Some(error),
        }
    }
}

/// Runs role-scoped agent calls against a completion service.
#[derive(Clone)]
pub struct AgentInvoker {
    service: Arc<dyn CompletionService>,
    prompts: PromptBook,
    timeout: Duration,
}

impl AgentInvoker {
    pub fn new(service: Arc<dyn CompletionService>) -> Self {
        Self {
            service,
            prompts: PromptBook::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_prompts(mut self, prompts: PromptBook) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// One round trip: send, wait up to the timeout, validate.
    pub async fn invoke(&self, request: &AgentRequest) -> Result<AgentOutput, InvocationFailure> {
        let role = request.role;
        debug!(
            role = %role,
            service = self.service.name(),
            schema = request.schema_id,
            prompt_len = request.prompt.len(),
            "Invoking agent"
        );

        let response = match tokio::time::timeout(self.timeout, self.service.complete(request)).await
        {
            Err(_) => {
                let failure = InvocationFailure::transport(
                    role,
                    format!("timed out after {:?}", self.timeout),
                );
                warn!(role = %role, "{}", failure);
                return Err(failure);
            }
            Ok(Err(e)) => {
                let failure = InvocationFailure::transport(role, e.to_string());
                warn!(role = %role, "{}", failure);
                return Err(failure);
            }
            Ok(Ok(value)) => value,
        };

        ContractValidator::validate_value(role, response).map_err(|e| {
            warn!(role = %role, "Agent response rejected: {}", e.summary());
            InvocationFailure::schema(e)
        })
    }

    /// Render, invoke and unwrap the typed output for a role input.
    pub async fn call<I: RoleInput>(&self, input: &I) -> AgentResult<I::Output> {
        let request = self.prompts.request(input)?;
        let output = self.invoke(&request).await?;
        // The validator dispatches on the request role, so the variant always matches.
        I::Output::from_output(output).ok_or_else(|| {
            InvocationFailure::transport(I::ROLE, "response variant did not match role").into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::{RequirementsGatherInput, ReviewerInput, RepoSnapshot};
    use crate::error::AgentError;
    use crate::mock::{MockCompletionService, MockReply};
    use serde_json::json;

    #[tokio::test]
    async fn test_call_returns_typed_output() {
        let mock = MockCompletionService::new().reply(
            AgentRole::Reviewer,
            MockReply::json(json!({"approved": true, "issues": [], "feedback": "fine"})),
        );
        let invoker = AgentInvoker::new(Arc::new(mock.clone()));

        let input = ReviewerInput::assemble(&RepoSnapshot::new(), &[], "ok");
        let review = invoker.call(&input).await.unwrap();
        assert!(review.approved);
        assert_eq!(mock.calls_for(AgentRole::Reviewer), 1);
    }

    #[tokio::test]
    async fn test_schema_failure_is_typed() {
        let mock = MockCompletionService::new()
            .reply(AgentRole::Reviewer, MockReply::json(json!({"approved": true})));
        let invoker = AgentInvoker::new(Arc::new(mock));

        let input = ReviewerInput::assemble(&RepoSnapshot::new(), &[], "ok");
        match invoker.call(&input).await {
            Err(AgentError::Invocation(failure)) => {
                assert_eq!(failure.kind, FailureKind::Schema);
                let schema = failure.schema_error.unwrap();
                assert_eq!(schema.missing_fields, vec!["issues", "feedback"]);
            }
            other => panic!("expected schema failure, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_transport_failure_is_not_retried() {
        let mock = MockCompletionService::new()
            .reply(AgentRole::RequirementsGather, MockReply::transport("connection reset"));
        let invoker = AgentInvoker::new(Arc::new(mock.clone()));

        let err = invoker
            .call(&RequirementsGatherInput::assemble("add power()", &[]))
            .await
            .unwrap_err();
        match err {
            AgentError::Invocation(failure) => {
                assert_eq!(failure.kind, FailureKind::Transport);
                assert!(failure.detail.contains("connection reset"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(mock.calls_for(AgentRole::RequirementsGather), 1);
    }

    #[tokio::test]
    async fn test_timeout_surfaces_as_transport() {
        let mock = MockCompletionService::new().reply(AgentRole::Reviewer, MockReply::Hang);
        let invoker = AgentInvoker::new(Arc::new(mock)).with_timeout(Duration::from_millis(50));

        let input = ReviewerInput::assemble(&RepoSnapshot::new(), &[], "");
        let request = PromptBook::new().request(&input).unwrap();
        let failure = invoker.invoke(&request).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Transport);
        assert_eq!(failure.detail, "timed out after 50ms");
    }
}
