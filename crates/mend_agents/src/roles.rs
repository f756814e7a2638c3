//! Agent role definitions.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::boundary::ArtifactKind;
use crate::error::AgentError;
use crate::schema::{self, Schema};

/// Roles an agent call can be scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Planner,
    Coder,
    Tester,
    Reviewer,
    DevOps,
    RequirementsGather,
    AcceptanceCriteria,
    ArchitectPlanner,
    TechnicalPlanner,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Planner => "planner",
            AgentRole::Coder => "coder",
            AgentRole::Tester => "tester",
            AgentRole::Reviewer => "reviewer",
            AgentRole::DevOps => "devops",
            AgentRole::RequirementsGather => "requirements_gather",
            AgentRole::AcceptanceCriteria => "acceptance_criteria",
            AgentRole::ArchitectPlanner => "architect_planner",
            AgentRole::TechnicalPlanner => "technical_planner",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            AgentRole::Planner => "Diagnoses failures and proposes a repair strategy",
            AgentRole::Coder => "Rewrites the files named in a plan",
            AgentRole::Tester => "Writes or updates test files for a change",
            AgentRole::Reviewer => "Approves or rejects a proposed change",
            AgentRole::DevOps => "Lands an approved change in source control",
            AgentRole::RequirementsGather => "Turns raw requirements into Gherkin scenarios",
            AgentRole::AcceptanceCriteria => "Derives testable acceptance criteria",
            AgentRole::ArchitectPlanner => "Produces the technical design for a feature",
            AgentRole::TechnicalPlanner => "Breaks a design into implementation steps",
        }
    }

    /// Output schema this role must satisfy.
    pub fn schema(&self) -> &'static Schema {
        match self {
            AgentRole::Planner => &schema::PLANNER,
            AgentRole::Coder => &schema::CODER,
            AgentRole::Tester => &schema::TESTER,
            AgentRole::Reviewer => &schema::REVIEWER,
            AgentRole::DevOps => &schema::DEVOPS,
            AgentRole::RequirementsGather => &schema::REQUIREMENTS_GATHER,
            AgentRole::AcceptanceCriteria => &schema::ACCEPTANCE_CRITERIA,
            AgentRole::ArchitectPlanner => &schema::ARCHITECT_PLANNER,
            AgentRole::TechnicalPlanner => &schema::TECHNICAL_PLANNER,
        }
    }

    /// Upstream artifacts an agent of this role may receive.
    pub fn permitted_artifacts(&self) -> &'static [ArtifactKind] {
        use ArtifactKind as A;
        match self {
            AgentRole::Planner => &[A::TestOutput, A::CiLogs, A::SourceFiles, A::Reflection],
            AgentRole::Coder => &[A::RepairPlan, A::TargetFiles],
            AgentRole::Tester => &[A::ChangedFiles, A::ExistingTests, A::CoverageGaps],
            AgentRole::Reviewer => &[A::OriginalFiles, A::ChangedFiles, A::TestOutput],
            AgentRole::DevOps => &[A::ChangedFiles, A::CommitMessage],
            AgentRole::RequirementsGather => &[A::RawRequirements, A::ClarificationHistory],
            AgentRole::AcceptanceCriteria => &[A::GherkinScenarios, A::RequirementsSummary],
            AgentRole::ArchitectPlanner => {
                &[A::GherkinScenarios, A::AcceptanceCriteria, A::SourceFiles]
            }
            AgentRole::TechnicalPlanner => &[A::TechnicalDesign, A::FileLists, A::TargetFiles],
        }
    }

    /// Whether the role is served by the completion service.
    ///
    /// DevOps is the source-control collaborator and never goes through an agent call.
    pub fn is_model_backed(&self) -> bool {
        !matches!(self, AgentRole::DevOps)
    }

    pub fn all() -> Vec<Self> {
        vec![
            AgentRole::Planner,
            AgentRole::Coder,
            AgentRole::Tester,
            AgentRole::Reviewer,
            AgentRole::DevOps,
            AgentRole::RequirementsGather,
            AgentRole::AcceptanceCriteria,
            AgentRole::ArchitectPlanner,
            AgentRole::TechnicalPlanner,
        ]
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        AgentRole::all()
            .into_iter()
            .find(|role| role.as_str() == normalized)
            .ok_or_else(|| AgentError::UnknownRole(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_str() {
        for role in AgentRole::all() {
            assert_eq!(role.as_str().parse::<AgentRole>().unwrap(), role);
        }
        assert_eq!(
            "Architect-Planner".parse::<AgentRole>().unwrap(),
            AgentRole::ArchitectPlanner
        );
        assert!("janitor".parse::<AgentRole>().is_err());
    }

    #[test]
    fn test_coder_never_sees_test_output() {
        let permitted = AgentRole::Coder.permitted_artifacts();
        assert!(!permitted.contains(&ArtifactKind::TestOutput));
        assert!(!permitted.contains(&ArtifactKind::CiLogs));
    }

    #[test]
    fn test_only_devops_is_not_model_backed() {
        let offline: Vec<_> = AgentRole::all()
            .into_iter()
            .filter(|r| !r.is_model_backed())
            .collect();
        assert_eq!(offline, vec![AgentRole::DevOps]);
    }
}
