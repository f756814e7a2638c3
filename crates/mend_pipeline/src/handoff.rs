//! DevOps handoff collaborator.
//!
//! The orchestrator never talks to git or CI directly. An approved change is
//! handed to a [`SourceControl`] implementation, which lands it and later
//! reports the CI verdict.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use mend_agents::HandoffManifest;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Pull-request title used by the bug-fix pipeline.
pub const BUGFIX_PR_TITLE: &str = "Autonomous Fix - Multi-Agent System";

/// What the orchestrator asks the collaborator to land.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffRequest {
    pub manifest: HandoffManifest,
    pub pr_title: String,
    pub pr_body: String,
}

/// Proof that a change landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffReceipt {
    pub commit_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
}

impl HandoffReceipt {
    pub fn new(commit_ref: impl Into<String>) -> Self {
        Self {
            commit_ref: commit_ref.into(),
            pr_number: None,
        }
    }
}

/// CI verdict for the most recent handoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CiStatus {
    Passed,
    Failed { logs: String },
    Pending,
    /// No CI is configured or its state could not be read.
    Unknown,
}

impl CiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CiStatus::Passed => "passed",
            CiStatus::Failed { .. } => "failed",
            CiStatus::Pending => "pending",
            CiStatus::Unknown => "unknown",
        }
    }

    /// Whether the checks reached a verdict.
    pub fn is_settled(&self) -> bool {
        matches!(self, CiStatus::Passed | CiStatus::Failed { .. })
    }
}

impl std::fmt::Display for CiStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lands approved changes and reports CI state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Apply, commit and publish the change set.
    async fn handoff(&self, request: &HandoffRequest) -> PipelineResult<HandoffReceipt>;

    /// CI verdict for the last handoff.
    async fn ci_status(&self) -> CiStatus;

    /// Whether a failing CI state warrants a bug-fix run.
    async fn should_start_bugfix(&self) -> bool {
        matches!(self.ci_status().await, CiStatus::Failed { .. })
    }
}

/// Scripted source control for tests and dry runs.
///
/// Commit refs are `commit-1`, `commit-2`, ... in handoff order. CI statuses
/// are consumed from a queue, falling back to a fixed status once it drains.
#[derive(Clone)]
pub struct ScriptedSourceControl {
    statuses: Arc<RwLock<VecDeque<CiStatus>>>,
    fallback: Arc<RwLock<CiStatus>>,
    failures: Arc<RwLock<VecDeque<String>>>,
    requests: Arc<RwLock<Vec<HandoffRequest>>>,
    commits: Arc<AtomicUsize>,
    ci_checks: Arc<AtomicUsize>,
}

impl Default for ScriptedSourceControl {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSourceControl {
    pub fn new() -> Self {
        Self {
            statuses: Arc::new(RwLock::new(VecDeque::new())),
            fallback: Arc::new(RwLock::new(CiStatus::Unknown)),
            failures: Arc::new(RwLock::new(VecDeque::new())),
            requests: Arc::new(RwLock::new(Vec::new())),
            commits: Arc::new(AtomicUsize::new(0)),
            ci_checks: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue the status returned by the next `ci_status` call.
    pub fn status(self, status: CiStatus) -> Self {
        self.statuses.write().push_back(status);
        self
    }

    /// Status returned once the queue is empty.
    pub fn always(self, status: CiStatus) -> Self {
        *self.fallback.write() = status;
        self
    }

    /// Make the next handoff fail with `message`.
    pub fn fail_next_handoff(self, message: impl Into<String>) -> Self {
        self.failures.write().push_back(message.into());
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<HandoffRequest> {
        self.requests.read().clone()
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of `ci_status` calls so far.
    pub fn ci_checks(&self) -> usize {
        self.ci_checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceControl for ScriptedSourceControl {
    async fn handoff(&self, request: &HandoffRequest) -> PipelineResult<HandoffReceipt> {
        self.requests.write().push(request.clone());
        if let Some(message) = self.failures.write().pop_front() {
            return Err(PipelineError::Handoff(message));
        }
        let n = self.commits.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(HandoffReceipt::new(format!("commit-{}", n)))
    }

    async fn ci_status(&self) -> CiStatus {
        self.ci_checks.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.statuses.write().pop_front() {
            return status;
        }
        self.fallback.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_agents::FileChange;

    fn request() -> HandoffRequest {
        HandoffRequest {
            manifest: HandoffManifest {
                files: vec![FileChange::new("calc.py", "x = 1")],
                commit_message: "fix".into(),
                target_branch: None,
            },
            pr_title: BUGFIX_PR_TITLE.into(),
            pr_body: String::new(),
        }
    }

    #[tokio::test]
    async fn test_scripted_commits_and_statuses() {
        let scm = ScriptedSourceControl::new()
            .status(CiStatus::Failed {
                logs: "1 failed".into(),
            })
            .always(CiStatus::Passed)
            .fail_next_handoff("remote rejected");

        assert!(scm.handoff(&request()).await.is_err());
        assert_eq!(scm.handoff(&request()).await.unwrap().commit_ref, "commit-1");
        assert_eq!(scm.requests().len(), 2);

        assert!(scm.should_start_bugfix().await);
        assert_eq!(scm.ci_status().await, CiStatus::Passed);
        assert_eq!(scm.ci_checks(), 2);
        assert!(CiStatus::Passed.is_settled());
        assert!(!CiStatus::Unknown.is_settled());
    }

    #[tokio::test]
    async fn test_mocked_collaborator() {
        let mut scm = MockSourceControl::new();
        scm.expect_handoff()
            .withf(|r| r.manifest.commit_message == "fix")
            .times(1)
            .returning(|_| Ok(HandoffReceipt::new("abc123")));
        scm.expect_ci_status().returning(|| CiStatus::Pending);

        let receipt = scm.handoff(&request()).await.unwrap();
        assert_eq!(receipt.commit_ref, "abc123");
        assert_eq!(scm.ci_status().await, CiStatus::Pending);
    }
}
