//! Prompt rendering.
//!
//! A prompt is the role's instruction template followed by the titled
//! sections of its boundary-checked input and a fixed JSON-only footer.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::boundary::{check_boundary, RoleInput};
use crate::error::{AgentError, AgentResult};
use crate::roles::AgentRole;

const JSON_FOOTER: &str =
    "Output your response as raw JSON only (no markdown, no explanations):";

/// One request to the completion service.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRequest {
    pub role: AgentRole,
    pub prompt: String,
    /// Identifier of the expected output schema.
    pub schema_id: &'static str,
    /// JSON Schema rendering of the expected output.
    pub schema: Value,
}

/// Instruction templates per role, optionally overridden from disk.
#[derive(Debug, Clone, Default)]
pub struct PromptBook {
    template_dir: Option<PathBuf>,
}

impl PromptBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `<dir>/<role>.md` in place of the built-in template when it exists.
    pub fn with_template_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.template_dir = Some(dir.into());
        self
    }

    pub fn template_dir(&self) -> Option<&Path> {
        self.template_dir.as_deref()
    }

    /// Instruction template for `role`.
    pub fn template(&self, role: AgentRole) -> AgentResult<String> {
        if let Some(dir) = &self.template_dir {
            let path = dir.join(format!("{}.md", role.as_str()));
            if path.exists() {
                debug!(role = %role, path = %path.display(), "Using prompt template override");
                return std::fs::read_to_string(&path).map_err(|e| {
                    AgentError::Template(format!("{}: {}", path.display(), e))
                });
            }
        }
        Ok(builtin_template(role).to_string())
    }

    /// Build the request for a boundary-checked input.
    pub fn request<I: RoleInput>(&self, input: &I) -> AgentResult<AgentRequest> {
        check_boundary(input)?;

        let mut prompt = self.template(I::ROLE)?;
        prompt.push('\n');
        for (title, body) in input.sections() {
            prompt.push_str(&format!("\n## {}\n\n{}\n", title, body));
        }
        prompt.push('\n');
        prompt.push_str(JSON_FOOTER);
        prompt.push('\n');

        let schema = I::ROLE.schema();
        Ok(AgentRequest {
            role: I::ROLE,
            prompt,
            schema_id: schema.id,
            schema: schema.to_json_schema(),
        })
    }
}

fn builtin_template(role: AgentRole) -> &'static str {
    match role {
        AgentRole::Planner => {
            "# Planner\n\nYou diagnose failing tests. Read the test output, CI logs and source files, \
             identify the root cause, and propose a single repair strategy. List only the files \
             that must change. Set `needs_new_tests` when the fix leaves behaviour untested."
        }
        AgentRole::Coder => {
            "# Coder\n\nYou implement a repair plan. Return the complete new content of every file \
             you change. Touch only the files named in the plan and write a one-line commit message."
        }
        AgentRole::Tester => {
            "# Tester\n\nYou write or update tests for the modified code. Return complete test \
             files only; never modify implementation files."
        }
        AgentRole::Reviewer => {
            "# Reviewer\n\nYou review a proposed change against the original files and the test \
             output. Approve only correct, minimal changes. When rejecting, list concrete issues \
             with file and line."
        }
        AgentRole::DevOps => {
            "# DevOps\n\nYou prepare the finalized file set and commit message for source control."
        }
        AgentRole::RequirementsGather => {
            "# Requirements\n\nYou turn raw requirements into Gherkin scenarios. Ask clarification \
             questions with suggested answers when the requirements are ambiguous."
        }
        AgentRole::AcceptanceCriteria => {
            "# Acceptance Criteria\n\nYou derive testable acceptance criteria, a definition of done \
             and risk areas from the scenarios. Classify each criterion as unit, integration, e2e \
             or manual."
        }
        AgentRole::ArchitectPlanner => {
            "# Architect\n\nYou design the technical approach for a feature against the existing \
             codebase. Record each design decision with its rationale and alternatives."
        }
        AgentRole::TechnicalPlanner => {
            "# Technical Planner\n\nYou break a technical design into numbered implementation \
             steps with dependencies and a complexity estimate of low, medium or high."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::{CoderInput, RepairPlan, RepoSnapshot};
    use tempfile::TempDir;

    fn coder_input() -> CoderInput {
        CoderInput::assemble(
            RepairPlan {
                analysis: "missing guard".into(),
                strategy: "check divisor".into(),
                files_to_modify: vec!["calc.py".into()],
            },
            &RepoSnapshot::from_files([("calc.py", "def divide(a, b): return a / b")]),
        )
    }

    #[test]
    fn test_request_layout() {
        let request = PromptBook::new().request(&coder_input()).unwrap();
        assert_eq!(request.role, AgentRole::Coder);
        assert_eq!(request.schema_id, "coder.v1");
        assert!(request.prompt.starts_with("# Coder"));
        assert!(request.prompt.contains("## Repair Plan\n\nAnalysis: missing guard"));
        assert!(request.prompt.contains("--- calc.py ---"));
        assert!(request.prompt.trim_end().ends_with(JSON_FOOTER));
    }

    #[test]
    fn test_template_override_from_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("coder.md"), "# Custom coder").unwrap();

        let book = PromptBook::new().with_template_dir(dir.path());
        let request = book.request(&coder_input()).unwrap();
        assert!(request.prompt.starts_with("# Custom coder"));

        // Roles without an override keep the built-in template.
        assert!(book.template(AgentRole::Planner).unwrap().starts_with("# Planner"));
    }
}
