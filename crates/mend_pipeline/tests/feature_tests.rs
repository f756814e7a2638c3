//! Integration tests for the feature pipeline.

use std::sync::Arc;

use mend_agents::{
    AgentInvoker, AgentRole, FailureKind, MockCompletionService, MockReply, RepoSnapshot,
};
use mend_core::{ApprovalMode, Checkpoint, HaltReason, RunConfig, RunStatus, RunStore};
use mend_pipeline::{Orchestrator, PipelineError, ScriptedSourceControl, StaticTestRunner};
use mend_policy::{Decision, PolicyError};
use serde_json::{json, Value};
use tempfile::tempdir;

fn requirements(questions: Value) -> MockReply {
    let needs = questions.as_array().map(|q| !q.is_empty()).unwrap_or(false);
    MockReply::json(json!({
        "gherkin_scenarios": [
            "Scenario: positive exponent\n  Given 2 and 3\n  Then power returns 8",
            "Scenario: zero exponent\n  Given 5 and 0\n  Then power returns 1"
        ],
        "needs_clarification": needs,
        "clarification_questions": questions,
        "requirements_summary": "Add power()"
    }))
}

fn two_questions() -> Value {
    json!([
        {
            "question": "Support negative exponents?",
            "context": "power(2, -1)",
            "suggested_answers": ["Yes, return a float", "No, raise ValueError", "Out of scope"]
        },
        {
            "question": "Which module?",
            "context": "placement",
            "suggested_answers": ["calc.py", "mathx.py", "utils.py"]
        }
    ])
}

fn criteria() -> MockReply {
    MockReply::json(json!({
        "acceptance_criteria": [
            {"criterion": "power(2, 3) == 8", "rationale": "basic case", "test_type": "unit"}
        ],
        "definition_of_done": ["tests pass"],
        "risk_areas": ["overflow"]
    }))
}

fn design() -> MockReply {
    MockReply::json(json!({
        "technical_design": "Add power() next to divide() in calc.py",
        "design_decisions": [{
            "aspect": "placement",
            "decision": "calc.py",
            "rationale": "existing math helpers",
            "alternatives_considered": ["new module"]
        }],
        "files_to_create": [],
        "files_to_modify": ["calc.py"],
        "dependencies_needed": []
    }))
}

fn plan() -> MockReply {
    MockReply::json(json!({
        "implementation_plan": "Implement power() in calc.py",
        "implementation_steps": [
            {"step_number": 1, "description": "write power()", "files_affected": ["calc.py"],
             "dependencies": [], "estimated_complexity": "low"},
            {"step_number": 2, "description": "add tests", "files_affected": ["test_calc.py"],
             "dependencies": [1], "estimated_complexity": "low"}
        ],
        "files_to_modify": ["calc.py"],
        "strategy": "extend calc",
        "needs_new_tests": true,
        "test_strategy": "unit tests for power()"
    }))
}

fn coder() -> MockReply {
    MockReply::json(json!({
        "files": [{"path": "calc.py", "content": "def power(a, b):\n    return a ** b\n"}],
        "commit_message": "Add power()"
    }))
}

fn tester() -> MockReply {
    MockReply::json(json!({
        "files": [{"path": "test_calc.py", "content": "def test_power():\n    assert power(2, 3) == 8\n"}],
        "test_strategy": "unit"
    }))
}

fn reviewer(approved: bool) -> MockReply {
    MockReply::json(json!({
        "approved": approved,
        "issues": [],
        "feedback": if approved { "ship it" } else { "power(0, 0) is unhandled" }
    }))
}

fn scripted(first_requirements: MockReply) -> MockCompletionService {
    MockCompletionService::new()
        .reply(AgentRole::RequirementsGather, first_requirements)
        .always(AgentRole::RequirementsGather, requirements(json!([])))
        .always(AgentRole::AcceptanceCriteria, criteria())
        .always(AgentRole::ArchitectPlanner, design())
        .always(AgentRole::TechnicalPlanner, plan())
        .always(AgentRole::Coder, coder())
        .always(AgentRole::Tester, tester())
        .always(AgentRole::Reviewer, reviewer(true))
}

fn orchestrator(
    mock: &MockCompletionService,
    mode: ApprovalMode,
    scm: &ScriptedSourceControl,
) -> Orchestrator {
    Orchestrator::new(
        AgentInvoker::new(Arc::new(mock.clone())),
        RunConfig::default().with_approval_mode(mode),
        Arc::new(scm.clone()),
        Arc::new(StaticTestRunner::failing("unused")),
    )
    .with_snapshot(RepoSnapshot::from_files([(
        "calc.py",
        "def divide(a, b):\n    return a / b\n",
    )]))
}

#[tokio::test]
async fn test_auto_approve_answers_with_first_suggestion_every_time() {
    for _ in 0..3 {
        let mock = scripted(requirements(two_questions()));
        let scm = ScriptedSourceControl::new();
        let run = orchestrator(&mock, ApprovalMode::AutoApprove, &scm)
            .run_feature("add power()")
            .await
            .unwrap();

        assert_eq!(run.status(), Some(RunStatus::Succeeded));
        let answers: Vec<&str> = run
            .feature_state()
            .clarifications
            .iter()
            .map(|e| e.answer.as_str())
            .collect();
        assert_eq!(answers, vec!["Yes, return a float", "calc.py"]);

        let second_round = &mock.requests_for(AgentRole::RequirementsGather)[1].prompt;
        assert!(second_round.contains("Q: Support negative exponents?\nA: Yes, return a float"));
        assert!(second_round.contains("Q: Which module?\nA: calc.py"));
    }
}

#[tokio::test]
async fn test_auto_approve_runs_every_stage_and_hands_off() {
    let mock = scripted(requirements(json!([])));
    let scm = ScriptedSourceControl::new();

    let run = orchestrator(&mock, ApprovalMode::AutoApprove, &scm)
        .run_feature("add power()")
        .await
        .unwrap();

    assert_eq!(run.status(), Some(RunStatus::Succeeded));
    assert_eq!(run.outcome().unwrap().commit_ref.as_deref(), Some("commit-1"));
    assert_eq!(
        mock.role_sequence(),
        vec![
            AgentRole::RequirementsGather,
            AgentRole::AcceptanceCriteria,
            AgentRole::ArchitectPlanner,
            AgentRole::TechnicalPlanner,
            AgentRole::Coder,
            AgentRole::Tester,
            AgentRole::Reviewer,
        ]
    );

    let checkpoints: Vec<Checkpoint> = run
        .feature_state()
        .approvals
        .iter()
        .map(|a| a.checkpoint)
        .collect();
    assert_eq!(
        checkpoints,
        vec![
            Checkpoint::GherkinScenarios,
            Checkpoint::AcceptanceCriteria,
            Checkpoint::TechnicalDesign,
            Checkpoint::ImplementationPlan,
            Checkpoint::PreCommit,
        ]
    );
    assert!(run.feature_state().approvals.iter().all(|a| a.automatic));

    let request = &scm.requests()[0];
    assert_eq!(request.pr_title, "Feature: Add power()");
    assert!(request.pr_body.contains("- Scenario: positive exponent"));
    assert!(request.pr_body.contains("2 steps completed"));
    let paths: Vec<&str> = request
        .manifest
        .files
        .iter()
        .map(|f| f.path.as_str())
        .collect();
    assert_eq!(paths, vec!["calc.py", "test_calc.py"]);

    // The Tester gets the plan's test strategy as its coverage gap.
    let tester_prompt = &mock.requests_for(AgentRole::Tester)[0].prompt;
    assert!(tester_prompt.contains("- unit tests for power()"));
}

#[tokio::test]
async fn test_interactive_run_suspends_at_each_checkpoint_and_resumes_from_store() {
    let dir = tempdir().unwrap();
    let store = RunStore::new(dir.path());
    let mock = scripted(requirements(two_questions()));
    let scm = ScriptedSourceControl::new();
    let orchestrator =
        orchestrator(&mock, ApprovalMode::Interactive, &scm).with_store(RunStore::new(dir.path()));

    let run = orchestrator.run_feature("add power()").await.unwrap();
    let pending = run.pending_approval().unwrap();
    assert_eq!(pending.checkpoint, Checkpoint::Clarification);
    assert_eq!(pending.questions.len(), 2);
    assert!(pending.summary.contains("1. Support negative exponents?"));
    assert_eq!(run.status(), None);

    let run_id = run.id().to_string();
    let run = store.load(&run_id).unwrap();
    let mut run = orchestrator
        .resume(
            run,
            Decision::Answer {
                answers: vec!["No, raise ValueError".into(), "mathx.py".into()],
            },
        )
        .await
        .unwrap();
    assert_eq!(
        run.feature_state().clarifications[1].answer,
        "mathx.py"
    );

    let mut seen = Vec::new();
    while let Some(pending) = run.pending_approval().cloned() {
        seen.push(pending.checkpoint);
        let stored = store.load(&run_id).unwrap();
        assert_eq!(stored.pending_approval(), Some(&pending));
        run = orchestrator.resume(stored, Decision::Approve).await.unwrap();
    }

    assert_eq!(
        seen,
        vec![
            Checkpoint::GherkinScenarios,
            Checkpoint::AcceptanceCriteria,
            Checkpoint::TechnicalDesign,
            Checkpoint::ImplementationPlan,
            Checkpoint::PreCommit,
        ]
    );
    assert_eq!(run.status(), Some(RunStatus::Succeeded));
    assert_eq!(store.load(&run_id).unwrap().status(), Some(RunStatus::Succeeded));
    assert!(run.feature_state().approvals.iter().all(|a| !a.automatic));
    assert_eq!(scm.commit_count(), 1);
}

#[tokio::test]
async fn test_rejecting_a_checkpoint_stops_the_run() {
    let mock = scripted(requirements(json!([])));
    let scm = ScriptedSourceControl::new();
    let orchestrator = orchestrator(&mock, ApprovalMode::Interactive, &scm);

    let mut run = orchestrator.run_feature("add power()").await.unwrap();
    while run.pending_approval().map(|p| p.checkpoint) != Some(Checkpoint::TechnicalDesign) {
        run = orchestrator.resume(run, Decision::Approve).await.unwrap();
    }
    let run = orchestrator
        .resume(
            run,
            Decision::Reject {
                feedback: "use a separate module".into(),
            },
        )
        .await
        .unwrap();

    assert_eq!(run.status(), Some(RunStatus::StoppedByRejection));
    assert!(run.outcome().unwrap().reason.contains("use a separate module"));
    assert_eq!(mock.calls_for(AgentRole::TechnicalPlanner), 0);
    assert_eq!(scm.commit_count(), 0);
}

#[tokio::test]
async fn test_wrong_answer_count_leaves_run_suspended() {
    let mock = scripted(requirements(two_questions()));
    let scm = ScriptedSourceControl::new();
    let orchestrator = orchestrator(&mock, ApprovalMode::Interactive, &scm);

    let run = orchestrator.run_feature("add power()").await.unwrap();
    let err = orchestrator
        .resume(
            run.clone(),
            Decision::Answer {
                answers: vec!["only one".into()],
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Policy(PolicyError::AnswerCount {
            expected: 2,
            found: 1
        })
    ));
    assert_eq!(
        run.pending_approval().map(|p| p.checkpoint),
        Some(Checkpoint::Clarification)
    );
}

#[tokio::test]
async fn test_clarification_loop_is_bounded_by_max_iterations() {
    let mock = MockCompletionService::new()
        .always(AgentRole::RequirementsGather, requirements(two_questions()));
    let scm = ScriptedSourceControl::new();
    let orchestrator = Orchestrator::new(
        AgentInvoker::new(Arc::new(mock.clone())),
        RunConfig::default()
            .with_approval_mode(ApprovalMode::AutoApprove)
            .with_max_iterations(2),
        Arc::new(scm.clone()),
        Arc::new(StaticTestRunner::failing("unused")),
    );

    let run = orchestrator.run_feature("add power()").await.unwrap();
    assert_eq!(run.status(), Some(RunStatus::MaxIterationsReached));
    assert_eq!(run.outcome().unwrap().halt, Some(HaltReason::MaxIterationsReached));
    assert_eq!(mock.calls_for(AgentRole::RequirementsGather), 2);
}

#[tokio::test]
async fn test_stage_failure_stops_by_safety_with_failure_kind() {
    let mock = scripted(requirements(json!([])))
        .reply(AgentRole::ArchitectPlanner, MockReply::transport("connection reset"));
    let scm = ScriptedSourceControl::new();

    let run = orchestrator(&mock, ApprovalMode::AutoApprove, &scm)
        .run_feature("add power()")
        .await
        .unwrap();

    assert_eq!(run.status(), Some(RunStatus::StoppedBySafety));
    let outcome = run.outcome().unwrap();
    assert_eq!(outcome.failure, Some(FailureKind::Transport));
    assert!(outcome.reason.contains("connection reset"));
    assert_eq!(mock.calls_for(AgentRole::TechnicalPlanner), 0);
}

#[tokio::test]
async fn test_reviewer_rejection_stops_before_handoff() {
    let mock = scripted(requirements(json!([]))).reply(AgentRole::Reviewer, reviewer(false));
    let scm = ScriptedSourceControl::new();

    let run = orchestrator(&mock, ApprovalMode::AutoApprove, &scm)
        .run_feature("add power()")
        .await
        .unwrap();

    assert_eq!(run.status(), Some(RunStatus::StoppedByRejection));
    assert_eq!(
        run.outcome().unwrap().reason,
        "Reviewer rejected: power(0, 0) is unhandled"
    );
    assert_eq!(scm.commit_count(), 0);
    assert!(!run
        .feature_state()
        .approvals
        .iter()
        .any(|a| a.checkpoint == Checkpoint::PreCommit));
}
