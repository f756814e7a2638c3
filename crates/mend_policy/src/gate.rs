//! Approval Gate.
//!
//! In auto-approve mode every checkpoint passes immediately and each
//! clarification question gets its first suggested answer. In interactive
//! mode the gate never blocks: it reports [`GateDecision::Suspended`] and the
//! orchestrator parks the run until [`ApprovalGate::resolve`] is called with
//! an external [`Decision`].

use chrono::Utc;
use mend_agents::{pair_answers, ClarificationExchange, ClarificationQuestion};
use mend_core::{ApprovalMode, ApprovalRecord, Checkpoint, PendingApproval};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PolicyError, PolicyResult};

/// Answer used when a question offers no suggestions.
pub const FALLBACK_ANSWER: &str = "Yes";

/// What the gate decided at a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Approved,
    Rejected { feedback: String },
    Answered(Vec<ClarificationExchange>),
    /// Waiting on an external actor.
    Suspended,
}

/// A decision supplied by the external actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject { feedback: String },
    Answer { answers: Vec<String> },
}

impl Decision {
    fn name(&self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Reject { .. } => "reject",
            Decision::Answer { .. } => "answer",
        }
    }
}

/// Deterministic answer to one question.
pub fn default_answer(question: &ClarificationQuestion) -> String {
    question
        .suggested_answers
        .first()
        .cloned()
        .unwrap_or_else(|| FALLBACK_ANSWER.to_string())
}

/// Per-checkpoint approval policy.
#[derive(Debug, Clone, Copy)]
pub struct ApprovalGate {
    mode: ApprovalMode,
}

impl ApprovalGate {
    pub fn new(mode: ApprovalMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ApprovalMode {
        self.mode
    }

    /// Decide a review checkpoint.
    pub fn await_approval(&self, checkpoint: Checkpoint) -> GateDecision {
        match self.mode {
            ApprovalMode::AutoApprove => {
                debug!(checkpoint = %checkpoint, "Auto-approved");
                GateDecision::Approved
            }
            ApprovalMode::Interactive => {
                info!(checkpoint = %checkpoint, "Waiting for approval");
                GateDecision::Suspended
            }
        }
    }

    /// Decide a round of clarification questions.
    pub fn clarify(&self, questions: &[ClarificationQuestion]) -> GateDecision {
        match self.mode {
            ApprovalMode::AutoApprove => {
                let answers: Vec<String> = questions.iter().map(default_answer).collect();
                debug!(count = answers.len(), "Auto-answered clarification questions");
                GateDecision::Answered(pair_answers(questions, &answers))
            }
            ApprovalMode::Interactive => {
                info!(count = questions.len(), "Waiting for clarification answers");
                GateDecision::Suspended
            }
        }
    }

    /// Apply an external decision to a pending checkpoint.
    ///
    /// Approving a clarification accepts the suggested defaults.
    pub fn resolve(pending: &PendingApproval, decision: Decision) -> PolicyResult<GateDecision> {
        match (pending.checkpoint, decision) {
            (Checkpoint::Clarification, Decision::Answer { answers }) => {
                if answers.len() != pending.questions.len() {
                    return Err(PolicyError::AnswerCount {
                        expected: pending.questions.len(),
                        found: answers.len(),
                    });
                }
                Ok(GateDecision::Answered(pair_answers(&pending.questions, &answers)))
            }
            (Checkpoint::Clarification, Decision::Approve) => {
                let answers: Vec<String> = pending.questions.iter().map(default_answer).collect();
                Ok(GateDecision::Answered(pair_answers(&pending.questions, &answers)))
            }
            (_, Decision::Reject { feedback }) => Ok(GateDecision::Rejected { feedback }),
            (_, Decision::Approve) => Ok(GateDecision::Approved),
            (checkpoint, decision) => Err(PolicyError::InvalidDecision {
                checkpoint,
                decision: decision.name().to_string(),
            }),
        }
    }

    /// Audit record for a decided checkpoint; `None` while suspended.
    pub fn record(
        checkpoint: Checkpoint,
        decision: &GateDecision,
        automatic: bool,
    ) -> Option<ApprovalRecord> {
        let (approved, feedback) = match decision {
            GateDecision::Approved | GateDecision::Answered(_) => (true, None),
            GateDecision::Rejected { feedback } => (false, Some(feedback.clone())),
            GateDecision::Suspended => return None,
        };
        Some(ApprovalRecord {
            checkpoint,
            approved,
            feedback,
            automatic,
            decided_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(text: &str, suggestions: &[&str]) -> ClarificationQuestion {
        ClarificationQuestion {
            question: text.into(),
            context: String::new(),
            suggested_answers: suggestions.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn pending(checkpoint: Checkpoint, questions: Vec<ClarificationQuestion>) -> PendingApproval {
        PendingApproval {
            checkpoint,
            summary: String::new(),
            questions,
            requested_at: Utc::now(),
        }
    }

    #[test]
    fn test_auto_mode_approves_immediately() {
        let gate = ApprovalGate::new(ApprovalMode::AutoApprove);
        assert_eq!(gate.await_approval(Checkpoint::PreCommit), GateDecision::Approved);
    }

    #[test]
    fn test_interactive_mode_suspends() {
        let gate = ApprovalGate::new(ApprovalMode::Interactive);
        assert_eq!(gate.await_approval(Checkpoint::TechnicalDesign), GateDecision::Suspended);
        assert_eq!(gate.clarify(&[question("q", &["a"])]), GateDecision::Suspended);
    }

    #[test]
    fn test_question_without_suggestions_gets_fallback() {
        assert_eq!(default_answer(&question("Proceed?", &[])), "Yes");
    }

    #[test]
    fn test_resolve_answers() {
        let pending = pending(
            Checkpoint::Clarification,
            vec![question("a?", &["x"]), question("b?", &["y"])],
        );
        let decision = ApprovalGate::resolve(
            &pending,
            Decision::Answer {
                answers: vec!["no".into(), "maybe".into()],
            },
        )
        .unwrap();
        match decision {
            GateDecision::Answered(pairs) => {
                assert_eq!(pairs[0].answer, "no");
                assert_eq!(pairs[1].question, "b?");
            }
            other => panic!("unexpected {:?}", other),
        }

        let err = ApprovalGate::resolve(&pending, Decision::Answer { answers: vec![] }).unwrap_err();
        assert!(matches!(err, PolicyError::AnswerCount { expected: 2, found: 0 }));
    }

    #[test]
    fn test_approving_clarification_takes_defaults() {
        let pending = pending(Checkpoint::Clarification, vec![question("a?", &["x", "z"])]);
        match ApprovalGate::resolve(&pending, Decision::Approve).unwrap() {
            GateDecision::Answered(pairs) => assert_eq!(pairs[0].answer, "x"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_answers_do_not_apply_to_review_checkpoints() {
        let pending = pending(Checkpoint::GherkinScenarios, vec![]);
        let err = ApprovalGate::resolve(
            &pending,
            Decision::Answer {
                answers: vec!["x".into()],
            },
        )
        .unwrap_err();
        assert!(matches!(err, PolicyError::InvalidDecision { .. }));

        let rejected = ApprovalGate::resolve(
            &pending,
            Decision::Reject {
                feedback: "missing edge cases".into(),
            },
        )
        .unwrap();
        assert_eq!(
            rejected,
            GateDecision::Rejected {
                feedback: "missing edge cases".into()
            }
        );
    }

    #[test]
    fn test_record_skips_suspension() {
        assert!(ApprovalGate::record(Checkpoint::PreCommit, &GateDecision::Suspended, false).is_none());
        let record =
            ApprovalGate::record(Checkpoint::PreCommit, &GateDecision::Approved, true).unwrap();
        assert!(record.approved && record.automatic);
    }
}
