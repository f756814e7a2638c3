//! Pipeline Orchestrator.
//!
//! Owns the collaborators shared by both pipelines and the plumbing around a
//! run: persistence, cancellation and terminal bookkeeping. The stage logic
//! lives in [`crate::bugfix`] and [`crate::feature`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mend_agents::{
    AgentError, AgentInvoker, ClaudeCliService, FailureKind, FileChange, PromptBook, RepoSnapshot,
};
use mend_core::{CoreError, PipelineRun, RunConfig, RunOutcome, RunStatus, RunStore};
use mend_policy::{PolicyError, SafetyConfig, SafetyGovernor};
use tracing::debug;

use crate::cancel::CancellationFlag;
use crate::error::{PipelineError, PipelineResult};
use crate::git::GitSourceControl;
use crate::handoff::SourceControl;
use crate::testrunner::{CommandTestRunner, TestRunner};
use crate::workspace;

/// Why a stage sequence stopped early.
#[derive(Debug)]
pub(crate) enum StageExit {
    /// The stage failed; the run decides whether to loop or halt.
    Failed {
        kind: Option<FailureKind>,
        reason: String,
    },
    Cancelled,
    /// Orchestrator-level error, surfaced to the caller.
    Fatal(PipelineError),
}

impl StageExit {
    pub(crate) fn handoff(error: PipelineError) -> Self {
        StageExit::Failed {
            kind: None,
            reason: error.to_string(),
        }
    }
}

impl From<AgentError> for StageExit {
    fn from(error: AgentError) -> Self {
        match error {
            AgentError::Invocation(failure) => StageExit::Failed {
                kind: Some(failure.kind),
                reason: failure.to_string(),
            },
            AgentError::Schema(schema) => StageExit::Failed {
                kind: Some(FailureKind::Schema),
                reason: schema.summary(),
            },
            other => StageExit::Failed {
                kind: None,
                reason: other.to_string(),
            },
        }
    }
}

impl From<PipelineError> for StageExit {
    fn from(error: PipelineError) -> Self {
        StageExit::Fatal(error)
    }
}

impl From<CoreError> for StageExit {
    fn from(error: CoreError) -> Self {
        StageExit::Fatal(error.into())
    }
}

impl From<PolicyError> for StageExit {
    fn from(error: PolicyError) -> Self {
        StageExit::Fatal(error.into())
    }
}

/// Drives bug-fix and feature runs.
pub struct Orchestrator {
    pub(crate) invoker: AgentInvoker,
    pub(crate) config: RunConfig,
    pub(crate) governor: SafetyGovernor,
    pub(crate) source_control: Arc<dyn SourceControl>,
    pub(crate) tests: Arc<dyn TestRunner>,
    workspace: Option<PathBuf>,
    seed: RepoSnapshot,
    store: Option<RunStore>,
    cancel: CancellationFlag,
}

impl Orchestrator {
    pub fn new(
        invoker: AgentInvoker,
        config: RunConfig,
        source_control: Arc<dyn SourceControl>,
        tests: Arc<dyn TestRunner>,
    ) -> Self {
        let governor = SafetyGovernor::new(SafetyConfig::from(&config));
        Self {
            invoker,
            config,
            governor,
            source_control,
            tests,
            workspace: None,
            seed: RepoSnapshot::new(),
            store: None,
            cancel: CancellationFlag::new(),
        }
    }

    /// Wire the default collaborators for a workspace on disk.
    pub fn for_workspace(config: RunConfig, root: &Path) -> Self {
        let mut prompts = PromptBook::new();
        if let Some(dir) = &config.template_dir {
            prompts = prompts.with_template_dir(root.join(dir));
        }
        let service = ClaudeCliService::new().with_binary(config.agent_binary.clone());
        let invoker = AgentInvoker::new(Arc::new(service))
            .with_timeout(Duration::from_secs(config.agent_timeout_secs))
            .with_prompts(prompts);
        let source_control = Arc::new(GitSourceControl::new(root));
        let tests = Arc::new(CommandTestRunner::new(config.test_command.clone(), root));

        Self::new(invoker, config, source_control, tests)
            .with_workspace(root)
            .with_store(RunStore::new(root))
    }

    /// Read repository files from disk at the start of each run.
    pub fn with_workspace(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace = Some(root.into());
        self
    }

    /// Use a fixed in-memory repository instead of a workspace.
    pub fn with_snapshot(mut self, repo: RepoSnapshot) -> Self {
        self.seed = repo;
        self
    }

    pub fn with_store(mut self, store: RunStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancel = flag;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn cancellation(&self) -> &CancellationFlag {
        &self.cancel
    }

    pub fn store(&self) -> Option<&RunStore> {
        self.store.as_ref()
    }

    pub(crate) fn load_repo(&self) -> PipelineResult<RepoSnapshot> {
        match &self.workspace {
            Some(root) => workspace::snapshot(root),
            None => Ok(self.seed.clone()),
        }
    }

    pub(crate) fn ensure_active(&self) -> Result<(), StageExit> {
        if self.cancel.is_cancelled() {
            Err(StageExit::Cancelled)
        } else {
            Ok(())
        }
    }

    pub(crate) fn persist(&self, run: &PipelineRun) -> PipelineResult<()> {
        if let Some(store) = &self.store {
            let path = store.save(run)?;
            debug!(run_id = %run.id(), path = %path.display(), "Run saved");
        }
        Ok(())
    }

    /// Assign the terminal status and save.
    pub(crate) fn conclude(
        &self,
        mut run: PipelineRun,
        outcome: RunOutcome,
    ) -> PipelineResult<PipelineRun> {
        run.finish(outcome)?;
        self.persist(&run)?;
        Ok(run)
    }

    pub(crate) fn cancelled(&self, run: PipelineRun) -> PipelineResult<PipelineRun> {
        self.conclude(run, RunOutcome::new(RunStatus::Cancelled, "Run cancelled"))
    }
}

/// Overlay `extra` on `changes`, replacing entries with the same path.
pub(crate) fn merge_changes(changes: &mut Vec<FileChange>, extra: &[FileChange]) {
    for change in extra {
        match changes.iter_mut().find(|c| c.path == change.path) {
            Some(existing) => existing.content = change.content.clone(),
            None => changes.push(change.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_agents::{AgentRole, InvocationFailure};

    #[test]
    fn test_merge_changes_prefers_later_content() {
        let mut changes = vec![FileChange::new("a.py", "1"), FileChange::new("b.py", "2")];
        merge_changes(
            &mut changes,
            &[FileChange::new("b.py", "3"), FileChange::new("test_a.py", "4")],
        );
        let flat: Vec<(&str, &str)> = changes
            .iter()
            .map(|c| (c.path.as_str(), c.content.as_str()))
            .collect();
        assert_eq!(flat, vec![("a.py", "1"), ("b.py", "3"), ("test_a.py", "4")]);
    }

    #[test]
    fn test_agent_errors_keep_failure_kind() {
        let exit = StageExit::from(AgentError::from(InvocationFailure::transport(
            AgentRole::Coder,
            "connection reset",
        )));
        match exit {
            StageExit::Failed { kind, reason } => {
                assert_eq!(kind, Some(FailureKind::Transport));
                assert!(reason.contains("connection reset"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let boundary = StageExit::from(AgentError::boundary(AgentRole::Tester, "not a test"));
        assert!(matches!(boundary, StageExit::Failed { kind: None, .. }));
    }
}
