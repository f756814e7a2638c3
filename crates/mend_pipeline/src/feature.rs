//! Feature-development pipeline.
//!
//! The run advances one step at a time, and the next step is derived from
//! what the run has already recorded. That is what lets an interactive run
//! stop at a checkpoint, be saved, and pick up again after `resume`.
//!
//! ```text
//! RequirementsGather ⟲ clarification
//!   → [gherkin-scenarios] → AcceptanceCriteria → [acceptance-criteria]
//!   → ArchitectPlanner → [technical-design] → TechnicalPlanner
//!   → [implementation-plan] → Coding → (Testing) → Reviewing
//!   → [pre-commit] → Handoff
//! ```

use chrono::Utc;
use mend_agents::{
    ensure_test_targets, AcceptanceCriteriaInput, AcceptanceCriteriaOutput,
    ArchitectPlannerInput, ArchitectPlannerOutput, ClarificationQuestion, CoderInput,
    CoderOutput, HandoffManifest, RepairPlan, RepoSnapshot, RequirementsGatherInput,
    RequirementsGatherOutput, ReviewerInput, ReviewerOutput, RoleContract, TechnicalPlannerInput,
    TechnicalPlannerOutput, TesterInput, TesterOutput,
};
use mend_core::{
    ApprovalMode, Checkpoint, PendingApproval, PipelineKind, PipelineRun, RunOutcome, RunStatus,
    Stage,
};
use mend_policy::{ApprovalGate, Decision, GateDecision, SafetyDecision};
use tracing::{info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::handoff::HandoffRequest;
use crate::orchestrator::{merge_changes, Orchestrator, StageExit};

/// The next thing a feature run has to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureStep {
    GatherRequirements,
    Clarify(Vec<ClarificationQuestion>),
    Review(Checkpoint),
    AcceptanceCriteria,
    ArchitectPlanner,
    TechnicalPlanner,
    Implement,
    Handoff,
}

/// What happened after a step.
enum StepFlow {
    Continue,
    Suspended,
    Finished(RunOutcome),
}

fn approved(run: &PipelineRun, checkpoint: Checkpoint) -> bool {
    run.feature_state()
        .approvals
        .iter()
        .any(|a| a.checkpoint == checkpoint && a.approved)
}

/// Derive the next step from the run's recorded stages and approvals.
pub fn next_step(run: &PipelineRun) -> FeatureStep {
    let Some(requirements) = run.latest_output::<RequirementsGatherOutput>() else {
        return FeatureStep::GatherRequirements;
    };
    if requirements.needs_clarification && !requirements.clarification_questions.is_empty() {
        let rounds = run.output_count::<RequirementsGatherOutput>();
        let answered = run
            .feature_state()
            .approvals
            .iter()
            .filter(|a| a.checkpoint == Checkpoint::Clarification)
            .count();
        return if answered < rounds {
            FeatureStep::Clarify(requirements.clarification_questions)
        } else {
            FeatureStep::GatherRequirements
        };
    }

    if !approved(run, Checkpoint::GherkinScenarios) {
        return FeatureStep::Review(Checkpoint::GherkinScenarios);
    }
    if run.output_count::<AcceptanceCriteriaOutput>() == 0 {
        return FeatureStep::AcceptanceCriteria;
    }
    if !approved(run, Checkpoint::AcceptanceCriteria) {
        return FeatureStep::Review(Checkpoint::AcceptanceCriteria);
    }
    if run.output_count::<ArchitectPlannerOutput>() == 0 {
        return FeatureStep::ArchitectPlanner;
    }
    if !approved(run, Checkpoint::TechnicalDesign) {
        return FeatureStep::Review(Checkpoint::TechnicalDesign);
    }
    if run.output_count::<TechnicalPlannerOutput>() == 0 {
        return FeatureStep::TechnicalPlanner;
    }
    if !approved(run, Checkpoint::ImplementationPlan) {
        return FeatureStep::Review(Checkpoint::ImplementationPlan);
    }
    if run.output_count::<ReviewerOutput>() == 0 {
        return FeatureStep::Implement;
    }
    if !approved(run, Checkpoint::PreCommit) {
        return FeatureStep::Review(Checkpoint::PreCommit);
    }
    FeatureStep::Handoff
}

fn require<T: RoleContract>(run: &PipelineRun) -> Result<T, StageExit> {
    run.latest_output::<T>().ok_or_else(|| {
        StageExit::Fatal(PipelineError::NotResumable(
            run.id().to_string(),
            format!("no {} output recorded", T::ROLE),
        ))
    })
}

/// Human-readable summary shown at a checkpoint.
pub fn checkpoint_summary(run: &PipelineRun, checkpoint: Checkpoint) -> String {
    match checkpoint {
        Checkpoint::Clarification => match run.latest_output::<RequirementsGatherOutput>() {
            Some(r) => r
                .clarification_questions
                .iter()
                .enumerate()
                .map(|(i, q)| format!("{}. {}", i + 1, q.question))
                .collect::<Vec<_>>()
                .join("\n"),
            None => String::new(),
        },
        Checkpoint::GherkinScenarios => match run.latest_output::<RequirementsGatherOutput>() {
            Some(r) => format!(
                "{}\n\n{} scenario(s):\n\n{}",
                r.requirements_summary,
                r.gherkin_scenarios.len(),
                r.gherkin_scenarios.join("\n\n")
            ),
            None => String::new(),
        },
        Checkpoint::AcceptanceCriteria => match run.latest_output::<AcceptanceCriteriaOutput>() {
            Some(ac) => {
                let mut lines: Vec<String> = ac
                    .acceptance_criteria
                    .iter()
                    .map(|c| format!("- {} ({})", c.criterion, c.test_type.as_str()))
                    .collect();
                if !ac.risk_areas.is_empty() {
                    lines.push(format!("Risk areas: {}", ac.risk_areas.join(", ")));
                }
                lines.join("\n")
            }
            None => String::new(),
        },
        Checkpoint::TechnicalDesign => match run.latest_output::<ArchitectPlannerOutput>() {
            Some(a) => format!(
                "{}\n\nFiles to create: {}\nFiles to modify: {}",
                a.technical_design,
                a.files_to_create.join(", "),
                a.files_to_modify.join(", ")
            ),
            None => String::new(),
        },
        Checkpoint::ImplementationPlan => match run.latest_output::<TechnicalPlannerOutput>() {
            Some(p) => p
                .implementation_steps
                .iter()
                .map(|s| {
                    format!(
                        "{}. {} [{}]",
                        s.step_number,
                        s.description,
                        s.estimated_complexity.as_str()
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
            None => String::new(),
        },
        Checkpoint::PreCommit => {
            let mut text = String::new();
            if let Some(code) = run.latest_output::<CoderOutput>() {
                text.push_str(&format!(
                    "Commit: {}\nFiles: {}",
                    code.commit_message,
                    code.paths().join(", ")
                ));
            }
            if let Some(review) = run.latest_output::<ReviewerOutput>() {
                text.push_str(&format!("\nReviewer: {}", review.feedback));
            }
            text
        }
    }
}

/// Pull-request body for a finished feature.
pub fn feature_pr_body(
    requirements: &RequirementsGatherOutput,
    design: &ArchitectPlannerOutput,
    plan: &TechnicalPlannerOutput,
) -> String {
    let scenarios: Vec<String> = requirements
        .gherkin_scenarios
        .iter()
        .map(|s| format!("- {}", s.lines().next().unwrap_or_default()))
        .collect();
    format!(
        "# {}\n\n## Gherkin Scenarios\n\n{}\n\n## Technical Design\n\n{}\n\n## Implementation Steps\n\n{} steps completed\n\n---\n\nGenerated by multi-agent feature development pipeline\n",
        requirements.requirements_summary,
        scenarios.join("\n"),
        design.technical_design,
        plan.implementation_steps.len()
    )
}

impl Orchestrator {
    /// Start a feature run and drive it until it finishes or suspends.
    pub async fn run_feature(&self, requirements: impl Into<String>) -> PipelineResult<PipelineRun> {
        let run = PipelineRun::feature(self.config.approval_mode, requirements);
        info!(run_id = %run.id(), mode = %run.approval_mode(), "Starting feature run");
        self.persist(&run)?;
        self.drive_feature(run).await
    }

    /// Apply an external decision to a suspended run and continue it.
    pub async fn resume(&self, mut run: PipelineRun, decision: Decision) -> PipelineResult<PipelineRun> {
        if run.kind() != PipelineKind::FeatureDev {
            return Err(PipelineError::NotResumable(
                run.id().to_string(),
                "only feature runs wait for approval".to_string(),
            ));
        }
        let pending = run.pending_approval().cloned().ok_or_else(|| {
            PipelineError::NotResumable(run.id().to_string(), "run is not awaiting approval".into())
        })?;
        let decision = ApprovalGate::resolve(&pending, decision)?;
        run.resume()?;
        info!(run_id = %run.id(), checkpoint = %pending.checkpoint, "Resuming run");

        match self.settle(&mut run, pending.checkpoint, decision, false, Vec::new()) {
            Ok(StepFlow::Continue) => self.drive_feature(run).await,
            Ok(StepFlow::Finished(outcome)) => self.conclude(run, outcome),
            Ok(StepFlow::Suspended) => {
                self.persist(&run)?;
                Ok(run)
            }
            Err(StageExit::Fatal(e)) => Err(e),
            Err(StageExit::Cancelled) => self.cancelled(run),
            Err(StageExit::Failed { kind, reason }) => self.stage_failed(run, kind, reason),
        }
    }

    async fn drive_feature(&self, mut run: PipelineRun) -> PipelineResult<PipelineRun> {
        let gate = ApprovalGate::new(run.approval_mode());
        let mut repo = self.load_repo()?;

        loop {
            if self.ensure_active().is_err() {
                return self.cancelled(run);
            }
            let step = next_step(&run);
            match self.feature_step(&mut run, &gate, &mut repo, step).await {
                Ok(StepFlow::Continue) => self.persist(&run)?,
                Ok(StepFlow::Suspended) => {
                    self.persist(&run)?;
                    return Ok(run);
                }
                Ok(StepFlow::Finished(outcome)) => return self.conclude(run, outcome),
                Err(StageExit::Cancelled) => return self.cancelled(run),
                Err(StageExit::Fatal(e)) => return Err(e),
                Err(StageExit::Failed { kind, reason }) => {
                    return self.stage_failed(run, kind, reason)
                }
            }
        }
    }

    fn stage_failed(
        &self,
        run: PipelineRun,
        kind: Option<mend_agents::FailureKind>,
        reason: String,
    ) -> PipelineResult<PipelineRun> {
        warn!(run_id = %run.id(), "Feature stage failed: {}", reason);
        let mut outcome = RunOutcome::new(RunStatus::StoppedBySafety, reason);
        if let Some(kind) = kind {
            outcome = outcome.with_failure(kind);
        }
        self.conclude(run, outcome)
    }

    /// Record a gate decision, or suspend when it has to wait.
    fn settle(
        &self,
        run: &mut PipelineRun,
        checkpoint: Checkpoint,
        decision: GateDecision,
        automatic: bool,
        questions: Vec<ClarificationQuestion>,
    ) -> Result<StepFlow, StageExit> {
        if let Some(record) = ApprovalGate::record(checkpoint, &decision, automatic) {
            run.record_approval(record)?;
        }
        match decision {
            GateDecision::Approved => Ok(StepFlow::Continue),
            GateDecision::Answered(exchanges) => {
                run.record_clarifications(exchanges)?;
                Ok(StepFlow::Continue)
            }
            GateDecision::Rejected { feedback } => Ok(StepFlow::Finished(RunOutcome::new(
                RunStatus::StoppedByRejection,
                format!("Rejected at {}: {}", checkpoint, feedback),
            ))),
            GateDecision::Suspended => {
                let summary = checkpoint_summary(run, checkpoint);
                run.suspend(PendingApproval {
                    checkpoint,
                    summary,
                    questions,
                    requested_at: Utc::now(),
                })?;
                Ok(StepFlow::Suspended)
            }
        }
    }

    async fn feature_step(
        &self,
        run: &mut PipelineRun,
        gate: &ApprovalGate,
        repo: &mut RepoSnapshot,
        step: FeatureStep,
    ) -> Result<StepFlow, StageExit> {
        let patterns = &self.config.patterns;
        let automatic = gate.mode() == ApprovalMode::AutoApprove;

        match step {
            FeatureStep::GatherRequirements => {
                let rounds = run.output_count::<RequirementsGatherOutput>();
                if let SafetyDecision::Halt { reason, message } =
                    self.governor.check_clarification(rounds)
                {
                    return Ok(StepFlow::Finished(RunOutcome::halted(reason, message)));
                }
                info!(run_id = %run.id(), round = rounds + 1, stage = %Stage::RequirementsGather, "Gathering requirements");
                let state = run.feature_state();
                let input =
                    RequirementsGatherInput::assemble(state.raw_requirements.clone(), &state.clarifications);
                let output = self.invoker.call(&input).await?;
                run.record_stage(Stage::RequirementsGather, output.into_output())?;
                Ok(StepFlow::Continue)
            }
            FeatureStep::Clarify(questions) => {
                let decision = gate.clarify(&questions);
                self.settle(run, Checkpoint::Clarification, decision, automatic, questions)
            }
            FeatureStep::Review(checkpoint) => {
                let decision = gate.await_approval(checkpoint);
                self.settle(run, checkpoint, decision, automatic, Vec::new())
            }
            FeatureStep::AcceptanceCriteria => {
                let requirements: RequirementsGatherOutput = require(run)?;
                info!(run_id = %run.id(), stage = %Stage::AcceptanceCriteria, "Deriving acceptance criteria");
                let input = AcceptanceCriteriaInput::assemble(
                    &requirements.gherkin_scenarios,
                    requirements.requirements_summary.clone(),
                );
                let output = self.invoker.call(&input).await?;
                run.record_stage(Stage::AcceptanceCriteria, output.into_output())?;
                Ok(StepFlow::Continue)
            }
            FeatureStep::ArchitectPlanner => {
                let requirements: RequirementsGatherOutput = require(run)?;
                let criteria: AcceptanceCriteriaOutput = require(run)?;
                info!(run_id = %run.id(), stage = %Stage::ArchitectPlanner, "Designing");
                let input = ArchitectPlannerInput::assemble(
                    &requirements.gherkin_scenarios,
                    &criteria.acceptance_criteria,
                    repo,
                    patterns,
                );
                let output = self.invoker.call(&input).await?;
                run.record_stage(Stage::ArchitectPlanner, output.into_output())?;
                Ok(StepFlow::Continue)
            }
            FeatureStep::TechnicalPlanner => {
                let design: ArchitectPlannerOutput = require(run)?;
                info!(run_id = %run.id(), stage = %Stage::TechnicalPlanner, "Planning implementation");
                let input = TechnicalPlannerInput::assemble(
                    design.technical_design.clone(),
                    &design.design_decisions,
                    &design.files_to_create,
                    &design.files_to_modify,
                    repo,
                );
                let output = self.invoker.call(&input).await?;
                run.record_stage(Stage::TechnicalPlanner, output.into_output())?;
                Ok(StepFlow::Continue)
            }
            FeatureStep::Implement => self.implement(run, repo).await,
            FeatureStep::Handoff => {
                let requirements: RequirementsGatherOutput = require(run)?;
                let design: ArchitectPlannerOutput = require(run)?;
                let plan: TechnicalPlannerOutput = require(run)?;
                let code: CoderOutput = require(run)?;

                let mut changes = code.files.clone();
                if let Some(tests) = run.latest_output::<TesterOutput>() {
                    merge_changes(&mut changes, &tests.files);
                }
                info!(run_id = %run.id(), stage = %Stage::Handoff, files = changes.len(), "Handing off feature");
                let request = HandoffRequest {
                    manifest: HandoffManifest {
                        files: changes.clone(),
                        commit_message: code.commit_message.clone(),
                        target_branch: self.config.target_branch.clone(),
                    },
                    pr_title: format!("Feature: {}", requirements.requirements_summary),
                    pr_body: feature_pr_body(&requirements, &design, &plan),
                };
                let receipt = self
                    .source_control
                    .handoff(&request)
                    .await
                    .map_err(StageExit::handoff)?;
                repo.apply(&changes);

                Ok(StepFlow::Finished(
                    RunOutcome::new(
                        RunStatus::Succeeded,
                        format!("Feature handed off as {}", receipt.commit_ref),
                    )
                    .with_commit(receipt.commit_ref),
                ))
            }
        }
    }

    /// Coding, optional Testing and Reviewing against the technical plan.
    async fn implement(
        &self,
        run: &mut PipelineRun,
        repo: &RepoSnapshot,
    ) -> Result<StepFlow, StageExit> {
        let patterns = &self.config.patterns;
        let plan: TechnicalPlannerOutput = require(run)?;

        self.ensure_active()?;
        info!(run_id = %run.id(), stage = %Stage::Coding, "Implementing");
        let code = self
            .invoker
            .call(&CoderInput::assemble(RepairPlan::from(&plan), repo))
            .await?;
        run.record_stage(Stage::Coding, code.clone().into_output())?;
        let mut changes = code.files.clone();

        if plan.needs_new_tests {
            self.ensure_active()?;
            info!(run_id = %run.id(), stage = %Stage::Testing, "Writing tests");
            let input = TesterInput::assemble(
                &code.files,
                repo,
                patterns,
                vec![plan.test_strategy.clone()],
            );
            let tests = self.invoker.call(&input).await?;
            ensure_test_targets(&tests.files, patterns)?;
            merge_changes(&mut changes, &tests.files);
            run.record_stage(Stage::Testing, tests.into_output())?;
        }

        self.ensure_active()?;
        info!(run_id = %run.id(), stage = %Stage::Reviewing, "Reviewing implementation");
        let review = self
            .invoker
            .call(&ReviewerInput::assemble(repo, &changes, String::new()))
            .await?;
        let approved = review.approved;
        let reason = review.rejection_reason();
        run.record_stage(Stage::Reviewing, review.into_output())?;

        if approved {
            Ok(StepFlow::Continue)
        } else {
            Ok(StepFlow::Finished(RunOutcome::new(
                RunStatus::StoppedByRejection,
                reason,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_agents::{ImplementationStep, Complexity};

    fn requirements(needs_clarification: bool) -> RequirementsGatherOutput {
        RequirementsGatherOutput {
            gherkin_scenarios: vec!["Scenario: power\n  Given 2 and 3".into()],
            needs_clarification,
            clarification_questions: if needs_clarification {
                vec![ClarificationQuestion {
                    question: "Negative exponents?".into(),
                    context: String::new(),
                    suggested_answers: vec!["Yes".into()],
                }]
            } else {
                vec![]
            },
            requirements_summary: "Add power()".into(),
        }
    }

    #[test]
    fn test_next_step_walks_the_pipeline() {
        let mut run = PipelineRun::feature(ApprovalMode::AutoApprove, "add power()");
        assert_eq!(next_step(&run), FeatureStep::GatherRequirements);

        run.record_stage(Stage::RequirementsGather, requirements(true).into_output())
            .unwrap();
        assert!(matches!(next_step(&run), FeatureStep::Clarify(q) if q.len() == 1));

        let gate = ApprovalGate::new(ApprovalMode::AutoApprove);
        let questions = requirements(true).clarification_questions;
        let decision = gate.clarify(&questions);
        let record = ApprovalGate::record(Checkpoint::Clarification, &decision, true).unwrap();
        run.record_approval(record).unwrap();
        assert_eq!(next_step(&run), FeatureStep::GatherRequirements);

        run.record_stage(Stage::RequirementsGather, requirements(false).into_output())
            .unwrap();
        assert_eq!(next_step(&run), FeatureStep::Review(Checkpoint::GherkinScenarios));
    }

    #[test]
    fn test_pr_body_uses_first_scenario_line() {
        let design = ArchitectPlannerOutput {
            technical_design: "Add math.power".into(),
            design_decisions: vec![],
            files_to_create: vec![],
            files_to_modify: vec!["calc.py".into()],
            dependencies_needed: vec![],
            design_diagrams: None,
        };
        let plan = TechnicalPlannerOutput {
            implementation_plan: "one step".into(),
            implementation_steps: vec![ImplementationStep {
                step_number: 1,
                description: "add power".into(),
                files_affected: vec!["calc.py".into()],
                dependencies: vec![],
                estimated_complexity: Complexity::Low,
            }],
            files_to_modify: vec!["calc.py".into()],
            strategy: "extend calc".into(),
            needs_new_tests: true,
            test_strategy: "unit".into(),
        };
        let body = feature_pr_body(&requirements(false), &design, &plan);
        assert!(body.starts_with("# Add power()"));
        assert!(body.contains("- Scenario: power\n"));
        assert!(body.contains("1 steps completed"));
    }
}
