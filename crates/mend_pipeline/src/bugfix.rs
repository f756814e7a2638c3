//! Bug-fix pipeline.
//!
//! Each iteration runs the test suite first. Passing tests with no pending CI
//! failure end the run. Otherwise the iteration goes
//! `Planning → Coding → (Testing) → Reviewing → Deciding`, and an approved
//! change is handed off and verified against CI. Every concluded iteration
//! is recorded before the Safety Governor decides whether another may start.
//! A plan that repeats the recorded strategies halts the run before any code
//! is written for it.

use mend_agents::{
    ensure_test_targets, CoderInput, HandoffManifest, PlannerInput, RepairPlan, RepoSnapshot,
    ReviewerInput, TesterInput,
};
use std::time::Duration;

use mend_core::{HaltReason, IterationDraft, PipelineRun, RunOutcome, RunStatus, Stage};
use mend_policy::SafetyDecision;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::PipelineResult;
use crate::handoff::{CiStatus, HandoffRequest, BUGFIX_PR_TITLE};
use crate::orchestrator::{merge_changes, Orchestrator, StageExit};
use crate::testrunner::TestReport;

/// Failure reason recorded when CI rejects a handed-off change.
pub const CI_FAILURE_REASON: &str = "CI checks failed";

/// Logs fed back when CI has not settled and a pass is required.
pub const CI_PENDING_REASON: &str = "CI checks still pending";

/// Logs fed back when no CI checks were reported and a pass is required.
pub const CI_MISSING_REASON: &str = "No CI checks reported";

/// How an iteration that reached a decision ended.
#[derive(Debug)]
enum IterationEnd {
    Verified,
    VerificationFailed { logs: String },
    Rejected(String),
    /// The planned strategy tripped the repetition guard.
    Halted { reason: HaltReason, message: String },
}

fn pr_body(strategy: &str, changes: &[mend_agents::FileChange]) -> String {
    let paths: Vec<&str> = changes.iter().map(|c| c.path.as_str()).collect();
    format!(
        "Generated by multi-agent autonomous repair system\n\nStrategy: {}\n\nFiles modified: {}",
        strategy,
        paths.join(", ")
    )
}

impl Orchestrator {
    /// Run the bug-fix loop until success, a safety halt or cancellation.
    pub async fn run_bug_fix(&self, problem: impl Into<String>) -> PipelineResult<PipelineRun> {
        let mut run = PipelineRun::bug_fix(self.config.approval_mode, problem);
        info!(run_id = %run.id(), "Starting bug-fix run");
        self.persist(&run)?;

        let mut repo = self.load_repo()?;
        let mut ci_logs = String::new();

        loop {
            if self.cancel_requested() {
                return self.cancelled(run);
            }
            if let SafetyDecision::Halt { reason, message } = self.governor.check(&run) {
                return self.conclude(run, RunOutcome::halted(reason, message));
            }

            let report = self.tests.run().await?;
            if report.passed && ci_logs.is_empty() {
                let reason = if run.iteration_count() == 0 {
                    "All tests already pass"
                } else {
                    "All tests pass"
                };
                return self.conclude(run, RunOutcome::new(RunStatus::Succeeded, reason));
            }

            let mut draft = run.begin_iteration()?;
            let result = self
                .bug_fix_iteration(&run, &mut draft, &mut repo, &report, &ci_logs)
                .await;

            let mut halted = None;
            let (record, verified) = match result {
                Ok(IterationEnd::Verified) => (draft.approved(), true),
                Ok(IterationEnd::VerificationFailed { logs }) => {
                    ci_logs = logs;
                    (draft.approved_but_failed(CI_FAILURE_REASON), false)
                }
                Ok(IterationEnd::Rejected(reason)) => (draft.rejected(reason), false),
                Ok(IterationEnd::Halted { reason, message }) => {
                    halted = Some(RunOutcome::halted(reason, message.clone()));
                    (draft.errored(None, message), false)
                }
                Err(StageExit::Failed { kind, reason }) => {
                    warn!(run_id = %run.id(), iteration = draft.index(), "Iteration failed: {}", reason);
                    (draft.errored(kind, reason), false)
                }
                Err(StageExit::Cancelled) => return self.cancelled(run),
                Err(StageExit::Fatal(e)) => return Err(e),
            };

            run.record_iteration(record)?;
            self.persist(&run)?;

            if let Some(outcome) = halted {
                return self.conclude(run, outcome);
            }
            if verified {
                return self.conclude(
                    run,
                    RunOutcome::new(RunStatus::Succeeded, "Change approved and verified"),
                );
            }
        }
    }

    fn cancel_requested(&self) -> bool {
        self.ensure_active().is_err()
    }

    async fn bug_fix_iteration(
        &self,
        run: &PipelineRun,
        draft: &mut IterationDraft,
        repo: &mut RepoSnapshot,
        report: &TestReport,
        ci_logs: &str,
    ) -> Result<IterationEnd, StageExit> {
        let patterns = &self.config.patterns;
        let iteration = draft.index();
        let run_id = run.id();

        self.ensure_active()?;
        info!(run_id, iteration, stage = %Stage::Planning, "Planning repair");
        let reflection = run.tracker().summarize_with(
            self.config.strategy_repetition_window,
            self.governor.similarity(),
        );
        let input = PlannerInput::assemble(&report.output, ci_logs, repo, patterns, reflection);
        let plan = self.invoker.call(&input).await?;
        draft.set_strategy(plan.strategy.clone());
        if let SafetyDecision::Halt { reason, message } =
            self.governor.check_strategy(run, &plan.strategy)
        {
            return Ok(IterationEnd::Halted { reason, message });
        }

        self.ensure_active()?;
        info!(run_id, iteration, stage = %Stage::Coding, strategy = %plan.strategy, "Writing fix");
        let code = self
            .invoker
            .call(&CoderInput::assemble(RepairPlan::from(&plan), repo))
            .await?;
        draft.touch_files(code.paths());
        let mut changes = code.files.clone();

        if plan.needs_new_tests {
            self.ensure_active()?;
            info!(run_id, iteration, stage = %Stage::Testing, "Writing tests");
            let input =
                TesterInput::assemble(&code.files, repo, patterns, plan.coverage_gaps.clone());
            let tests = self.invoker.call(&input).await?;
            ensure_test_targets(&tests.files, patterns)?;
            draft.touch_files(tests.files.iter().map(|f| f.path.clone()));
            merge_changes(&mut changes, &tests.files);
        }

        self.ensure_active()?;
        info!(run_id, iteration, stage = %Stage::Reviewing, "Reviewing change");
        let evidence = if report.output.is_empty() {
            ci_logs
        } else {
            report.output.as_str()
        };
        let review = self
            .invoker
            .call(&ReviewerInput::assemble(repo, &changes, evidence))
            .await?;

        if !review.approved {
            let reason = review.rejection_reason();
            info!(run_id, iteration, stage = %Stage::Deciding, "{}", reason);
            return Ok(IterationEnd::Rejected(reason));
        }

        self.ensure_active()?;
        info!(run_id, iteration, stage = %Stage::Handoff, files = changes.len(), "Handing off approved change");
        let request = HandoffRequest {
            manifest: HandoffManifest {
                files: changes.clone(),
                commit_message: code.commit_message.clone(),
                target_branch: self.config.target_branch.clone(),
            },
            pr_title: BUGFIX_PR_TITLE.to_string(),
            pr_body: pr_body(&plan.strategy, &changes),
        };
        let receipt = self
            .source_control
            .handoff(&request)
            .await
            .map_err(StageExit::handoff)?;
        draft.mark_applied(receipt.commit_ref.clone());
        repo.apply(&changes);

        info!(run_id, iteration, stage = %Stage::Verifying, commit = %receipt.commit_ref, "Checking CI");
        Ok(self.verify().await)
    }

    /// Poll CI until it settles or the configured wait runs out.
    async fn await_ci(&self) -> CiStatus {
        let deadline = Instant::now() + Duration::from_secs(self.config.ci_wait_secs);
        let poll = Duration::from_millis(self.config.ci_poll_ms);
        loop {
            let status = self.source_control.ci_status().await;
            if status.is_settled() || Instant::now() >= deadline {
                return status;
            }
            debug!(status = %status, "Waiting for CI checks");
            tokio::time::sleep(poll).await;
        }
    }

    async fn verify(&self) -> IterationEnd {
        let required = self.config.require_ci_pass;
        match self.await_ci().await {
            CiStatus::Passed => IterationEnd::Verified,
            CiStatus::Pending | CiStatus::Unknown if !required => IterationEnd::Verified,
            CiStatus::Pending => IterationEnd::VerificationFailed {
                logs: CI_PENDING_REASON.to_string(),
            },
            CiStatus::Unknown => IterationEnd::VerificationFailed {
                logs: CI_MISSING_REASON.to_string(),
            },
            CiStatus::Failed { logs } if logs.trim().is_empty() => {
                IterationEnd::VerificationFailed {
                    logs: CI_FAILURE_REASON.to_string(),
                }
            }
            CiStatus::Failed { logs } => IterationEnd::VerificationFailed { logs },
        }
    }
}
