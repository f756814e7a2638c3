//! Typed output contracts for every role.
//!
//! Validated agent responses are deserialized into these structs and wrapped
//! in the closed [`AgentOutput`] enum; nothing downstream handles untyped JSON.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::roles::AgentRole;

/// A complete replacement for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub content: String,
}

impl FileChange {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannerOutput {
    pub analysis: String,
    pub files_to_modify: Vec<String>,
    pub strategy: String,
    pub needs_new_tests: bool,
    pub coverage_gaps: Vec<String>,
    pub should_strategy_change: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoderOutput {
    pub files: Vec<FileChange>,
    pub commit_message: String,
}

impl CoderOutput {
    /// Paths touched by this change, in output order.
    pub fn paths(&self) -> Vec<String> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TesterOutput {
    pub files: Vec<FileChange>,
    pub test_strategy: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewIssue {
    pub file: String,
    pub line: i64,
    pub issue: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewerOutput {
    pub approved: bool,
    pub issues: Vec<ReviewIssue>,
    pub feedback: String,
}

impl ReviewerOutput {
    /// Feedback with issues folded in, as handed back to the Planner.
    pub fn rejection_reason(&self) -> String {
        if self.issues.is_empty() {
            return format!("Reviewer rejected: {}", self.feedback);
        }
        let issues: Vec<String> = self
            .issues
            .iter()
            .map(|i| format!("{}:{} {}", i.file, i.line, i.issue))
            .collect();
        format!("Reviewer rejected: {} ({})", self.feedback, issues.join("; "))
    }
}

/// Finalized artifact set handed to the DevOps collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffManifest {
    pub files: Vec<FileChange>,
    pub commit_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_branch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarificationQuestion {
    pub question: String,
    pub context: String,
    pub suggested_answers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementsGatherOutput {
    pub gherkin_scenarios: Vec<String>,
    pub needs_clarification: bool,
    pub clarification_questions: Vec<ClarificationQuestion>,
    pub requirements_summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    Unit,
    Integration,
    E2e,
    Manual,
}

impl TestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestType::Unit => "unit",
            TestType::Integration => "integration",
            TestType::E2e => "e2e",
            TestType::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptanceCriterion {
    pub criterion: String,
    pub rationale: String,
    pub test_type: TestType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptanceCriteriaOutput {
    pub acceptance_criteria: Vec<AcceptanceCriterion>,
    pub definition_of_done: Vec<String>,
    pub risk_areas: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechnicalDecision {
    pub aspect: String,
    pub decision: String,
    pub rationale: String,
    pub alternatives_considered: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchitectPlannerOutput {
    pub technical_design: String,
    pub design_decisions: Vec<TechnicalDecision>,
    pub files_to_create: Vec<String>,
    pub files_to_modify: Vec<String>,
    pub dependencies_needed: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub design_diagrams: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Low => "low",
            Complexity::Medium => "medium",
            Complexity::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementationStep {
    pub step_number: u32,
    pub description: String,
    pub files_affected: Vec<String>,
    pub dependencies: Vec<u32>,
    pub estimated_complexity: Complexity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechnicalPlannerOutput {
    pub implementation_plan: String,
    pub implementation_steps: Vec<ImplementationStep>,
    pub files_to_modify: Vec<String>,
    pub strategy: String,
    pub needs_new_tests: bool,
    pub test_strategy: String,
}

/// A validated output, tagged by the role that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "output", rename_all = "snake_case")]
pub enum AgentOutput {
    Planner(PlannerOutput),
    Coder(CoderOutput),
    Tester(TesterOutput),
    Reviewer(ReviewerOutput),
    #[serde(rename = "devops")]
    DevOps(HandoffManifest),
    RequirementsGather(RequirementsGatherOutput),
    AcceptanceCriteria(AcceptanceCriteriaOutput),
    ArchitectPlanner(ArchitectPlannerOutput),
    TechnicalPlanner(TechnicalPlannerOutput),
}

impl AgentOutput {
    pub fn role(&self) -> AgentRole {
        match self {
            AgentOutput::Planner(_) => AgentRole::Planner,
            AgentOutput::Coder(_) => AgentRole::Coder,
            AgentOutput::Tester(_) => AgentRole::Tester,
            AgentOutput::Reviewer(_) => AgentRole::Reviewer,
            AgentOutput::DevOps(_) => AgentRole::DevOps,
            AgentOutput::RequirementsGather(_) => AgentRole::RequirementsGather,
            AgentOutput::AcceptanceCriteria(_) => AgentRole::AcceptanceCriteria,
            AgentOutput::ArchitectPlanner(_) => AgentRole::ArchitectPlanner,
            AgentOutput::TechnicalPlanner(_) => AgentRole::TechnicalPlanner,
        }
    }

    /// Deserialize an already schema-checked value for `role`.
    pub(crate) fn from_value(
        role: AgentRole,
        value: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        Ok(match role {
            AgentRole::Planner => AgentOutput::Planner(serde_json::from_value(value)?),
            AgentRole::Coder => AgentOutput::Coder(serde_json::from_value(value)?),
            AgentRole::Tester => AgentOutput::Tester(serde_json::from_value(value)?),
            AgentRole::Reviewer => AgentOutput::Reviewer(serde_json::from_value(value)?),
            AgentRole::DevOps => AgentOutput::DevOps(serde_json::from_value(value)?),
            AgentRole::RequirementsGather => {
                AgentOutput::RequirementsGather(serde_json::from_value(value)?)
            }
            AgentRole::AcceptanceCriteria => {
                AgentOutput::AcceptanceCriteria(serde_json::from_value(value)?)
            }
            AgentRole::ArchitectPlanner => {
                AgentOutput::ArchitectPlanner(serde_json::from_value(value)?)
            }
            AgentRole::TechnicalPlanner => {
                AgentOutput::TechnicalPlanner(serde_json::from_value(value)?)
            }
        })
    }
}

/// Links a typed output struct to its role and its [`AgentOutput`] variant.
pub trait RoleContract: DeserializeOwned + Serialize + Clone + Send + 'static {
    const ROLE: AgentRole;

    fn into_output(self) -> AgentOutput;

    fn from_output(output: AgentOutput) -> Option<Self>;
}

macro_rules! role_contract {
    ($ty:ty, $variant:ident) => {
        impl RoleContract for $ty {
            const ROLE: AgentRole = AgentRole::$variant;

            fn into_output(self) -> AgentOutput {
                AgentOutput::$variant(self)
            }

            fn from_output(output: AgentOutput) -> Option<Self> {
                match output {
                    AgentOutput::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

role_contract!(PlannerOutput, Planner);
role_contract!(CoderOutput, Coder);
role_contract!(TesterOutput, Tester);
role_contract!(ReviewerOutput, Reviewer);
role_contract!(HandoffManifest, DevOps);
role_contract!(RequirementsGatherOutput, RequirementsGather);
role_contract!(AcceptanceCriteriaOutput, AcceptanceCriteria);
role_contract!(ArchitectPlannerOutput, ArchitectPlanner);
role_contract!(TechnicalPlannerOutput, TechnicalPlanner);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_output_serializes_with_role_tag() {
        let output = ReviewerOutput {
            approved: false,
            issues: vec![],
            feedback: "missing guard".into(),
        }
        .into_output();

        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(value["role"], "reviewer");
        assert_eq!(value["output"]["feedback"], "missing guard");

        let back: AgentOutput = serde_json::from_value(value).unwrap();
        assert_eq!(back.role(), AgentRole::Reviewer);
    }

    #[test]
    fn test_rejection_reason_folds_issues() {
        let review = ReviewerOutput {
            approved: false,
            issues: vec![ReviewIssue {
                file: "calc.py".into(),
                line: 12,
                issue: "division by zero".into(),
            }],
            feedback: "guard the divisor".into(),
        };
        assert_eq!(
            review.rejection_reason(),
            "Reviewer rejected: guard the divisor (calc.py:12 division by zero)"
        );
    }

    #[test]
    fn test_from_output_rejects_other_variant() {
        let coder = CoderOutput {
            files: vec![FileChange::new("a.py", "x = 1")],
            commit_message: "fix".into(),
        }
        .into_output();
        assert!(PlannerOutput::from_output(coder.clone()).is_none());
        assert_eq!(CoderOutput::from_output(coder).unwrap().paths(), vec!["a.py"]);
    }
}
