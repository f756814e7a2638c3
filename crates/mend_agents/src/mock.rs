//! Mock completion service for testing.
//!
//! Replies are queued per role and consumed in order; a role can also have a
//! fallback reply used once its queue is empty. Every request is captured so
//! tests can assert on prompts and call counts.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::invoker::{CompletionService, TransportError};
use crate::prompt::AgentRequest;
use crate::roles::AgentRole;

/// Scripted reply to one request.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Return this value as the structured response.
    Json(Value),
    /// Fail at the transport layer.
    Transport(String),
    /// Never answer; only a timeout ends the call.
    Hang,
}

impl MockReply {
    pub fn json(value: Value) -> Self {
        Self::Json(value)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}

/// Mock completion service.
#[derive(Clone, Default)]
pub struct MockCompletionService {
    queues: Arc<RwLock<HashMap<AgentRole, VecDeque<MockReply>>>>,
    fallbacks: Arc<RwLock<HashMap<AgentRole, MockReply>>>,
    captured: Arc<RwLock<Vec<AgentRequest>>>,
    call_count: Arc<AtomicUsize>,
}

impl MockCompletionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next unanswered call of `role`.
    pub fn reply(self, role: AgentRole, reply: MockReply) -> Self {
        self.queues.write().entry(role).or_default().push_back(reply);
        self
    }

    /// Queue several replies for `role`, in order.
    pub fn replies(self, role: AgentRole, replies: impl IntoIterator<Item = MockReply>) -> Self {
        self.queues.write().entry(role).or_default().extend(replies);
        self
    }

    /// Reply used for `role` whenever its queue is empty.
    pub fn always(self, role: AgentRole, reply: MockReply) -> Self {
        self.fallbacks.write().insert(role, reply);
        self
    }

    /// Total number of calls received.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Number of calls received for `role`.
    pub fn calls_for(&self, role: AgentRole) -> usize {
        self.captured.read().iter().filter(|r| r.role == role).count()
    }

    /// All captured requests, in arrival order.
    pub fn requests(&self) -> Vec<AgentRequest> {
        self.captured.read().clone()
    }

    /// Captured requests for `role`.
    pub fn requests_for(&self, role: AgentRole) -> Vec<AgentRequest> {
        self.captured
            .read()
            .iter()
            .filter(|r| r.role == role)
            .cloned()
            .collect()
    }

    /// Roles in the order they were called.
    pub fn role_sequence(&self) -> Vec<AgentRole> {
        self.captured.read().iter().map(|r| r.role).collect()
    }

    fn next_reply(&self, role: AgentRole) -> Option<MockReply> {
        if let Some(reply) = self.queues.write().get_mut(&role).and_then(VecDeque::pop_front) {
            return Some(reply);
        }
        self.fallbacks.read().get(&role).cloned()
    }
}

#[async_trait]
impl CompletionService for MockCompletionService {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: &AgentRequest) -> Result<Value, TransportError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.captured.write().push(request.clone());

        match self.next_reply(request.role) {
            Some(MockReply::Json(value)) => Ok(value),
            Some(MockReply::Transport(message)) => Err(TransportError::Process(message)),
            Some(MockReply::Hang) => std::future::pending().await,
            None => Err(TransportError::Unavailable(format!(
                "no mock reply scripted for {}",
                request.role
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(role: AgentRole) -> AgentRequest {
        AgentRequest {
            role,
            prompt: "p".into(),
            schema_id: role.schema().id,
            schema: json!({}),
        }
    }

    #[tokio::test]
    async fn test_queue_then_fallback() {
        let mock = MockCompletionService::new()
            .reply(AgentRole::Planner, MockReply::json(json!({"n": 1})))
            .always(AgentRole::Planner, MockReply::json(json!({"n": 0})));

        let first = mock.complete(&request(AgentRole::Planner)).await.unwrap();
        let second = mock.complete(&request(AgentRole::Planner)).await.unwrap();
        let third = mock.complete(&request(AgentRole::Planner)).await.unwrap();
        assert_eq!(first["n"], 1);
        assert_eq!(second["n"], 0);
        assert_eq!(third["n"], 0);
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_unscripted_role_is_unavailable() {
        let mock = MockCompletionService::new();
        let err = mock.complete(&request(AgentRole::Coder)).await.unwrap_err();
        assert!(matches!(err, TransportError::Unavailable(_)));
        assert_eq!(mock.role_sequence(), vec![AgentRole::Coder]);
    }
}
