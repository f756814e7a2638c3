//! Pipeline run model.
//!
//! A [`PipelineRun`] is owned and mutated by exactly one orchestrator. Its
//! phase moves from `Running` to either `AwaitingApproval` (and back) or to
//! `Finished`, after which nothing more can be appended.

use chrono::{DateTime, Utc};
use mend_agents::{
    AgentOutput, ClarificationExchange, ClarificationQuestion, FailureKind, RoleContract,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ApprovalMode;
use crate::error::{CoreError, CoreResult};
use crate::reflection::ReflectionTracker;

/// Which workflow a run follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    BugFix,
    FeatureDev,
}

impl PipelineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineKind::BugFix => "bug_fix",
            PipelineKind::FeatureDev => "feature_dev",
        }
    }
}

impl std::fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    StoppedBySafety,
    StoppedByRejection,
    MaxIterationsReached,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::StoppedBySafety => "stopped_by_safety",
            RunStatus::StoppedByRejection => "stopped_by_rejection",
            RunStatus::MaxIterationsReached => "max_iterations_reached",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Succeeded)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Policy-driven reason for stopping a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    MaxIterationsReached,
    RunawayLoop,
    RepeatedStrategy,
}

impl HaltReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            HaltReason::MaxIterationsReached => "max_iterations_reached",
            HaltReason::RunawayLoop => "runaway_loop",
            HaltReason::RepeatedStrategy => "repeated_strategy",
        }
    }

    /// Terminal status a halt maps to.
    pub fn status(&self) -> RunStatus {
        match self {
            HaltReason::MaxIterationsReached => RunStatus::MaxIterationsReached,
            HaltReason::RunawayLoop | HaltReason::RepeatedStrategy => RunStatus::StoppedBySafety,
        }
    }
}

impl std::fmt::Display for HaltReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How an iteration's review concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    Approved,
    Rejected,
    /// A stage failed before a verdict was reached.
    Errored,
}

/// Approval checkpoints exposed to the external actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Checkpoint {
    Clarification,
    GherkinScenarios,
    AcceptanceCriteria,
    TechnicalDesign,
    ImplementationPlan,
    PreCommit,
}

impl Checkpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Checkpoint::Clarification => "clarification",
            Checkpoint::GherkinScenarios => "gherkin-scenarios",
            Checkpoint::AcceptanceCriteria => "acceptance-criteria",
            Checkpoint::TechnicalDesign => "technical-design",
            Checkpoint::ImplementationPlan => "implementation-plan",
            Checkpoint::PreCommit => "pre-commit",
        }
    }
}

impl std::fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pipeline stages, for logging and stage records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Planning,
    Coding,
    Testing,
    Reviewing,
    Deciding,
    Handoff,
    Verifying,
    RequirementsGather,
    AcceptanceCriteria,
    ArchitectPlanner,
    TechnicalPlanner,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Planning => "planning",
            Stage::Coding => "coding",
            Stage::Testing => "testing",
            Stage::Reviewing => "reviewing",
            Stage::Deciding => "deciding",
            Stage::Handoff => "handoff",
            Stage::Verifying => "verifying",
            Stage::RequirementsGather => "requirements_gather",
            Stage::AcceptanceCriteria => "acceptance_criteria",
            Stage::ArchitectPlanner => "architect_planner",
            Stage::TechnicalPlanner => "technical_planner",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One concluded pass through the bug-fix pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Starts at 1, no gaps.
    pub index: u32,
    /// Planner strategy; empty if planning itself failed.
    pub strategy: String,
    pub files_touched: Vec<String>,
    pub verdict: ReviewVerdict,
    /// Whether an approved change was handed off.
    pub change_applied: bool,
    pub failure_reason: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub commit_ref: Option<String>,
    pub started_at: DateTime<Utc>,
    pub concluded_at: DateTime<Utc>,
}

impl IterationRecord {
    /// Whether the attempt failed in any way.
    pub fn failed(&self) -> bool {
        matches!(self.verdict, ReviewVerdict::Rejected | ReviewVerdict::Errored)
            || self.failure_reason.is_some()
    }
}

/// An iteration in progress. Only validated stage outputs are written into it.
#[derive(Debug, Clone)]
pub struct IterationDraft {
    index: u32,
    started_at: DateTime<Utc>,
    strategy: String,
    files_touched: Vec<String>,
    commit_ref: Option<String>,
    change_applied: bool,
}

impl IterationDraft {
    fn new(index: u32) -> Self {
        Self {
            index,
            started_at: Utc::now(),
            strategy: String::new(),
            files_touched: Vec::new(),
            commit_ref: None,
            change_applied: false,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    pub fn set_strategy(&mut self, strategy: impl Into<String>) {
        self.strategy = strategy.into();
    }

    pub fn touch_files<I, S>(&mut self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for path in paths {
            let path = path.into();
            if !self.files_touched.contains(&path) {
                self.files_touched.push(path);
            }
        }
    }

    /// Mark the change as handed off under `commit_ref`.
    pub fn mark_applied(&mut self, commit_ref: impl Into<String>) {
        self.change_applied = true;
        self.commit_ref = Some(commit_ref.into());
    }

    pub fn approved(self) -> IterationRecord {
        self.conclude(ReviewVerdict::Approved, None, None)
    }

    /// Approved and applied, but verification failed afterwards.
    pub fn approved_but_failed(self, reason: impl Into<String>) -> IterationRecord {
        self.conclude(ReviewVerdict::Approved, Some(reason.into()), None)
    }

    pub fn rejected(self, reason: impl Into<String>) -> IterationRecord {
        self.conclude(ReviewVerdict::Rejected, Some(reason.into()), None)
    }

    pub fn errored(self, kind: Option<FailureKind>, reason: impl Into<String>) -> IterationRecord {
        self.conclude(ReviewVerdict::Errored, Some(reason.into()), kind)
    }

    fn conclude(
        self,
        verdict: ReviewVerdict,
        failure_reason: Option<String>,
        failure_kind: Option<FailureKind>,
    ) -> IterationRecord {
        IterationRecord {
            index: self.index,
            strategy: self.strategy,
            files_touched: self.files_touched,
            verdict,
            change_applied: self.change_applied,
            failure_reason,
            failure_kind,
            commit_ref: self.commit_ref,
            started_at: self.started_at,
            concluded_at: Utc::now(),
        }
    }
}

/// A validated feature-pipeline stage output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub output: AgentOutput,
    pub completed_at: DateTime<Utc>,
}

/// A checkpoint decision taken during the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub checkpoint: Checkpoint,
    pub approved: bool,
    pub feedback: Option<String>,
    /// Whether the gate decided without an external actor.
    pub automatic: bool,
    pub decided_at: DateTime<Utc>,
}

/// Suspension details while waiting on an external decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub checkpoint: Checkpoint,
    /// Human-readable summary of what is being approved.
    pub summary: String,
    /// Open questions, for the clarification checkpoint.
    #[serde(default)]
    pub questions: Vec<ClarificationQuestion>,
    pub requested_at: DateTime<Utc>,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub reason: String,
    pub halt: Option<HaltReason>,
    pub failure: Option<FailureKind>,
    pub last_iteration: Option<IterationRecord>,
    pub commit_ref: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl RunOutcome {
    pub fn new(status: RunStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            halt: None,
            failure: None,
            last_iteration: None,
            commit_ref: None,
            finished_at: Utc::now(),
        }
    }

    pub fn halted(halt: HaltReason, reason: impl Into<String>) -> Self {
        let mut outcome = Self::new(halt.status(), reason);
        outcome.halt = Some(halt);
        outcome
    }

    pub fn with_failure(mut self, kind: FailureKind) -> Self {
        self.failure = Some(kind);
        self
    }

    pub fn with_commit(mut self, commit_ref: impl Into<String>) -> Self {
        self.commit_ref = Some(commit_ref.into());
        self
    }
}

/// Where a run currently stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RunPhase {
    Running,
    AwaitingApproval(PendingApproval),
    Finished(RunOutcome),
}

/// Feature-pipeline state carried across suspensions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureState {
    pub raw_requirements: String,
    pub clarifications: Vec<ClarificationExchange>,
    pub approvals: Vec<ApprovalRecord>,
    pub stages: Vec<StageRecord>,
}

/// The top-level unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    id: String,
    kind: PipelineKind,
    approval_mode: ApprovalMode,
    /// Problem statement for a bug fix, raw requirements for a feature.
    subject: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    tracker: ReflectionTracker,
    #[serde(default)]
    feature: FeatureState,
    phase: RunPhase,
}

impl PipelineRun {
    pub fn new(kind: PipelineKind, approval_mode: ApprovalMode, subject: impl Into<String>) -> Self {
        let now = Utc::now();
        let subject = subject.into();
        let feature = match kind {
            PipelineKind::FeatureDev => FeatureState {
                raw_requirements: subject.clone(),
                ..Default::default()
            },
            PipelineKind::BugFix => FeatureState::default(),
        };
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            approval_mode,
            subject,
            created_at: now,
            updated_at: now,
            tracker: ReflectionTracker::new(),
            feature,
            phase: RunPhase::Running,
        }
    }

    pub fn bug_fix(approval_mode: ApprovalMode, subject: impl Into<String>) -> Self {
        Self::new(PipelineKind::BugFix, approval_mode, subject)
    }

    pub fn feature(approval_mode: ApprovalMode, raw_requirements: impl Into<String>) -> Self {
        Self::new(PipelineKind::FeatureDev, approval_mode, raw_requirements)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    pub fn approval_mode(&self) -> ApprovalMode {
        self.approval_mode
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn phase(&self) -> &RunPhase {
        &self.phase
    }

    pub fn tracker(&self) -> &ReflectionTracker {
        &self.tracker
    }

    pub fn iterations(&self) -> &[IterationRecord] {
        self.tracker.records()
    }

    pub fn iteration_count(&self) -> usize {
        self.tracker.len()
    }

    pub fn feature_state(&self) -> &FeatureState {
        &self.feature
    }

    pub fn outcome(&self) -> Option<&RunOutcome> {
        match &self.phase {
            RunPhase::Finished(outcome) => Some(outcome),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<RunStatus> {
        self.outcome().map(|o| o.status)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, RunPhase::Finished(_))
    }

    pub fn pending_approval(&self) -> Option<&PendingApproval> {
        match &self.phase {
            RunPhase::AwaitingApproval(pending) => Some(pending),
            _ => None,
        }
    }

    fn ensure_running(&self) -> CoreResult<()> {
        match &self.phase {
            RunPhase::Running => Ok(()),
            RunPhase::Finished(_) => Err(CoreError::RunFinished(self.id.clone())),
            RunPhase::AwaitingApproval(p) => Err(CoreError::InvalidState(format!(
                "run {} is awaiting approval at {}",
                self.id, p.checkpoint
            ))),
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Open the next iteration.
    pub fn begin_iteration(&self) -> CoreResult<IterationDraft> {
        self.ensure_running()?;
        Ok(IterationDraft::new(self.tracker.next_index()))
    }

    /// Append a concluded iteration.
    pub fn record_iteration(&mut self, record: IterationRecord) -> CoreResult<()> {
        self.ensure_running()?;
        debug!(
            run_id = %self.id,
            iteration = record.index,
            verdict = ?record.verdict,
            "Recording iteration"
        );
        self.tracker.record(record)?;
        self.touch();
        Ok(())
    }

    /// Append a validated feature stage output.
    pub fn record_stage(&mut self, stage: Stage, output: AgentOutput) -> CoreResult<()> {
        self.ensure_running()?;
        self.feature.stages.push(StageRecord {
            stage,
            output,
            completed_at: Utc::now(),
        });
        self.touch();
        Ok(())
    }

    /// Most recent stage output of type `T`.
    pub fn latest_output<T: RoleContract>(&self) -> Option<T> {
        self.feature
            .stages
            .iter()
            .rev()
            .find_map(|s| T::from_output(s.output.clone()))
    }

    /// Number of recorded outputs of type `T`.
    pub fn output_count<T: RoleContract>(&self) -> usize {
        self.feature
            .stages
            .iter()
            .filter(|s| s.output.role() == T::ROLE)
            .count()
    }

    pub fn record_clarifications(&mut self, exchanges: Vec<ClarificationExchange>) -> CoreResult<()> {
        self.ensure_running()?;
        self.feature.clarifications.extend(exchanges);
        self.touch();
        Ok(())
    }

    pub fn record_approval(&mut self, record: ApprovalRecord) -> CoreResult<()> {
        self.ensure_running()?;
        self.feature.approvals.push(record);
        self.touch();
        Ok(())
    }

    /// Suspend until an external decision arrives.
    pub fn suspend(&mut self, pending: PendingApproval) -> CoreResult<()> {
        self.ensure_running()?;
        info!(run_id = %self.id, checkpoint = %pending.checkpoint, "Run awaiting approval");
        self.phase = RunPhase::AwaitingApproval(pending);
        self.touch();
        Ok(())
    }

    /// Leave the awaiting state, returning what was pending.
    pub fn resume(&mut self) -> CoreResult<PendingApproval> {
        match std::mem::replace(&mut self.phase, RunPhase::Running) {
            RunPhase::AwaitingApproval(pending) => {
                self.touch();
                Ok(pending)
            }
            other => {
                let state = match &other {
                    RunPhase::Finished(_) => "finished",
                    _ => "running",
                };
                self.phase = other;
                Err(CoreError::InvalidState(format!(
                    "run {} is {}, not awaiting approval",
                    self.id, state
                )))
            }
        }
    }

    /// Assign the terminal status. The last iteration is attached automatically.
    pub fn finish(&mut self, mut outcome: RunOutcome) -> CoreResult<&RunOutcome> {
        if self.is_finished() {
            return Err(CoreError::RunFinished(self.id.clone()));
        }
        if outcome.last_iteration.is_none() {
            outcome.last_iteration = self.tracker.last().cloned();
        }
        if outcome.commit_ref.is_none() {
            outcome.commit_ref = outcome
                .last_iteration
                .as_ref()
                .and_then(|i| i.commit_ref.clone());
        }
        info!(
            run_id = %self.id,
            status = %outcome.status,
            iterations = self.tracker.len(),
            "Run finished: {}",
            outcome.reason
        );
        self.phase = RunPhase::Finished(outcome);
        self.touch();
        match &self.phase {
            RunPhase::Finished(outcome) => Ok(outcome),
            _ => Err(CoreError::InvalidState("run did not finish".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_agents::ReviewerOutput;

    #[test]
    fn test_iterations_start_at_one() {
        let mut run = PipelineRun::bug_fix(ApprovalMode::AutoApprove, "divide by zero");
        let mut draft = run.begin_iteration().unwrap();
        assert_eq!(draft.index(), 1);
        draft.set_strategy("guard divisor");
        run.record_iteration(draft.rejected("Reviewer rejected: no")).unwrap();

        assert_eq!(run.begin_iteration().unwrap().index(), 2);
    }

    #[test]
    fn test_nothing_appends_after_finish() {
        let mut run = PipelineRun::bug_fix(ApprovalMode::AutoApprove, "bug");
        let draft = run.begin_iteration().unwrap();
        run.record_iteration(draft.approved()).unwrap();
        let pending_draft = run.begin_iteration().unwrap();

        run.finish(RunOutcome::new(RunStatus::Succeeded, "done")).unwrap();
        assert!(matches!(run.begin_iteration(), Err(CoreError::RunFinished(_))));
        assert!(matches!(
            run.record_iteration(pending_draft.approved()),
            Err(CoreError::RunFinished(_))
        ));
        assert!(run.finish(RunOutcome::new(RunStatus::Cancelled, "again")).is_err());
        assert_eq!(run.iteration_count(), 1);
        assert_eq!(run.status(), Some(RunStatus::Succeeded));
    }

    #[test]
    fn test_finish_attaches_last_iteration() {
        let mut run = PipelineRun::bug_fix(ApprovalMode::AutoApprove, "bug");
        let mut draft = run.begin_iteration().unwrap();
        draft.mark_applied("abc123");
        run.record_iteration(draft.approved_but_failed("CI checks failed")).unwrap();

        let outcome = run
            .finish(RunOutcome::halted(HaltReason::RunawayLoop, "runaway"))
            .unwrap();
        assert_eq!(outcome.status, RunStatus::StoppedBySafety);
        assert_eq!(outcome.last_iteration.as_ref().unwrap().index, 1);
        assert_eq!(outcome.commit_ref.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_suspend_and_resume() {
        let mut run = PipelineRun::feature(ApprovalMode::Interactive, "add power()");
        run.suspend(PendingApproval {
            checkpoint: Checkpoint::GherkinScenarios,
            summary: "2 scenarios".into(),
            questions: vec![],
            requested_at: Utc::now(),
        })
        .unwrap();

        assert!(run.record_stage(
            Stage::AcceptanceCriteria,
            ReviewerOutput {
                approved: true,
                issues: vec![],
                feedback: String::new()
            }
            .into_output()
        )
        .is_err());

        let pending = run.resume().unwrap();
        assert_eq!(pending.checkpoint, Checkpoint::GherkinScenarios);
        assert!(run.resume().is_err());
        assert_eq!(run.phase(), &RunPhase::Running);
    }

    #[test]
    fn test_latest_output_by_type() {
        let mut run = PipelineRun::feature(ApprovalMode::AutoApprove, "x");
        for feedback in ["first", "second"] {
            run.record_stage(
                Stage::Reviewing,
                ReviewerOutput {
                    approved: false,
                    issues: vec![],
                    feedback: feedback.into(),
                }
                .into_output(),
            )
            .unwrap();
        }
        let latest: ReviewerOutput = run.latest_output().unwrap();
        assert_eq!(latest.feedback, "second");
        assert_eq!(run.output_count::<ReviewerOutput>(), 2);
    }

    #[test]
    fn test_run_serializes_phase() {
        let mut run = PipelineRun::bug_fix(ApprovalMode::Interactive, "bug");
        run.finish(RunOutcome::new(RunStatus::Cancelled, "cancelled")).unwrap();
        let value = serde_json::to_value(&run).unwrap();
        assert_eq!(value["phase"]["phase"], "finished");
        assert_eq!(value["phase"]["status"], "cancelled");

        let back: PipelineRun = serde_json::from_value(value).unwrap();
        assert_eq!(back.status(), Some(RunStatus::Cancelled));
        assert_eq!(back.id(), run.id());
    }
}
