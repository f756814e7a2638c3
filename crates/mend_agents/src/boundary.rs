//! Information boundaries between roles.
//!
//! Every role receives a dedicated input struct built from upstream artifacts.
//! The structs only have room for what the role may see, and
//! [`check_boundary`] confirms the artifacts a built input carries are all
//! permitted for its role before a prompt is rendered.

use std::collections::BTreeMap;

use glob::Pattern;
use serde::{Deserialize, Serialize};

use crate::contracts::{
    AcceptanceCriteriaOutput, AcceptanceCriterion, ArchitectPlannerOutput, ClarificationQuestion,
    CoderOutput, FileChange, PlannerOutput, RequirementsGatherOutput, ReviewerOutput,
    RoleContract, TechnicalDecision, TechnicalPlannerOutput, TesterOutput,
};
use crate::error::{AgentError, AgentResult};
use crate::roles::AgentRole;

/// Kinds of upstream artifact an agent can be handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    TestOutput,
    CiLogs,
    SourceFiles,
    Reflection,
    RepairPlan,
    TargetFiles,
    ChangedFiles,
    ExistingTests,
    CoverageGaps,
    OriginalFiles,
    CommitMessage,
    RawRequirements,
    ClarificationHistory,
    GherkinScenarios,
    RequirementsSummary,
    AcceptanceCriteria,
    TechnicalDesign,
    FileLists,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::TestOutput => "test_output",
            ArtifactKind::CiLogs => "ci_logs",
            ArtifactKind::SourceFiles => "source_files",
            ArtifactKind::Reflection => "reflection",
            ArtifactKind::RepairPlan => "repair_plan",
            ArtifactKind::TargetFiles => "target_files",
            ArtifactKind::ChangedFiles => "changed_files",
            ArtifactKind::ExistingTests => "existing_tests",
            ArtifactKind::CoverageGaps => "coverage_gaps",
            ArtifactKind::OriginalFiles => "original_files",
            ArtifactKind::CommitMessage => "commit_message",
            ArtifactKind::RawRequirements => "raw_requirements",
            ArtifactKind::ClarificationHistory => "clarification_history",
            ArtifactKind::GherkinScenarios => "gherkin_scenarios",
            ArtifactKind::RequirementsSummary => "requirements_summary",
            ArtifactKind::AcceptanceCriteria => "acceptance_criteria",
            ArtifactKind::TechnicalDesign => "technical_design",
            ArtifactKind::FileLists => "file_lists",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Glob patterns that classify repository files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePatterns {
    #[serde(default = "default_source_patterns")]
    pub source: Vec<String>,
    #[serde(default = "default_test_patterns")]
    pub tests: Vec<String>,
}

fn default_source_patterns() -> Vec<String> {
    vec!["*.py".to_string()]
}

fn default_test_patterns() -> Vec<String> {
    vec!["test_*.py".to_string(), "*_test.py".to_string()]
}

impl Default for FilePatterns {
    fn default() -> Self {
        Self {
            source: default_source_patterns(),
            tests: default_test_patterns(),
        }
    }
}

impl FilePatterns {
    pub fn is_source(&self, path: &str) -> bool {
        matches_any(path, &self.source)
    }

    pub fn is_test(&self, path: &str) -> bool {
        matches_any(path, &self.tests)
    }
}

/// A pattern matches either the whole relative path or the file name.
fn matches_any(path: &str, patterns: &[String]) -> bool {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    patterns.iter().any(|p| match Pattern::new(p) {
        Ok(pattern) => pattern.matches(path) || pattern.matches(file_name),
        Err(_) => false,
    })
}

/// In-memory view of repository files keyed by relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSnapshot {
    files: BTreeMap<String, String>,
}

impl RepoSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_files<I, P, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        Self {
            files: files
                .into_iter()
                .map(|(p, c)| (p.into(), c.into()))
                .collect(),
        }
    }

    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Files whose path or name matches one of `patterns`.
    pub fn matching(&self, patterns: &[String]) -> Self {
        Self {
            files: self
                .files
                .iter()
                .filter(|(path, _)| matches_any(path, patterns))
                .map(|(p, c)| (p.clone(), c.clone()))
                .collect(),
        }
    }

    /// Only the named files; names absent from the snapshot are skipped.
    pub fn select<S: AsRef<str>>(&self, paths: &[S]) -> Self {
        Self {
            files: paths
                .iter()
                .filter_map(|p| {
                    let p = p.as_ref();
                    self.files.get(p).map(|c| (p.to_string(), c.clone()))
                })
                .collect(),
        }
    }

    /// Overlay file changes onto the snapshot.
    pub fn apply(&mut self, changes: &[FileChange]) {
        for change in changes {
            self.files.insert(change.path.clone(), change.content.clone());
        }
    }
}

/// Summary of previous iterations handed to the Planner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectionContext {
    pub previous_attempt_failed: bool,
    pub failure_reason: String,
    /// Oldest first.
    pub recent_strategies: Vec<String>,
    pub should_strategy_change: bool,
}

/// One question/answer pair from a clarification round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarificationExchange {
    pub question: String,
    pub answer: String,
}

/// A role-scoped input ready for prompt rendering.
pub trait RoleInput {
    /// Typed output the role answers with.
    type Output: RoleContract;

    const ROLE: AgentRole;

    /// Artifacts this input actually carries.
    fn artifacts(&self) -> Vec<ArtifactKind>;

    /// Titled prompt sections, in order.
    fn sections(&self) -> Vec<(&'static str, String)>;
}

/// Fail if `input` carries an artifact its role may not see.
pub fn check_boundary<I: RoleInput>(input: &I) -> AgentResult<()> {
    let permitted = I::ROLE.permitted_artifacts();
    for artifact in input.artifacts() {
        if !permitted.contains(&artifact) {
            return Err(AgentError::boundary(
                I::ROLE,
                format!("{} is not visible to this role", artifact),
            ));
        }
    }
    Ok(())
}

/// Fail if the Tester proposes a change to a non-test file.
pub fn ensure_test_targets(changes: &[FileChange], patterns: &FilePatterns) -> AgentResult<()> {
    let offending: Vec<&str> = changes
        .iter()
        .filter(|c| !patterns.is_test(&c.path))
        .map(|c| c.path.as_str())
        .collect();
    if offending.is_empty() {
        Ok(())
    } else {
        Err(AgentError::boundary(
            AgentRole::Tester,
            format!("may only write test files, got [{}]", offending.join(", ")),
        ))
    }
}

fn format_files<'a>(files: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    let mut text = String::new();
    for (path, content) in files {
        text.push_str(&format!("\n--- {} ---\n{}\n", path, content));
    }
    text
}

fn format_changes(changes: &[FileChange]) -> String {
    format_files(changes.iter().map(|c| (c.path.as_str(), c.content.as_str())))
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|i| format!("- {}", i))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone)]
pub struct PlannerInput {
    pub test_output: String,
    pub ci_logs: String,
    pub source_files: RepoSnapshot,
    pub reflection: ReflectionContext,
}

impl PlannerInput {
    pub fn assemble(
        test_output: impl Into<String>,
        ci_logs: impl Into<String>,
        repo: &RepoSnapshot,
        patterns: &FilePatterns,
        reflection: ReflectionContext,
    ) -> Self {
        Self {
            test_output: test_output.into(),
            ci_logs: ci_logs.into(),
            source_files: repo.matching(&patterns.source),
            reflection,
        }
    }
}

impl RoleInput for PlannerInput {
    type Output = PlannerOutput;
    const ROLE: AgentRole = AgentRole::Planner;

    fn artifacts(&self) -> Vec<ArtifactKind> {
        let mut artifacts = vec![ArtifactKind::TestOutput, ArtifactKind::SourceFiles];
        if !self.ci_logs.is_empty() {
            artifacts.push(ArtifactKind::CiLogs);
        }
        artifacts.push(ArtifactKind::Reflection);
        artifacts
    }

    fn sections(&self) -> Vec<(&'static str, String)> {
        let mut sections = Vec::new();
        let r = &self.reflection;
        if r.previous_attempt_failed {
            let mut text = format!(
                "The previous repair attempt FAILED.\n\nFailure reason: {}\n",
                r.failure_reason
            );
            if !r.recent_strategies.is_empty() {
                text.push_str("\nRecent strategies (oldest first):\n");
                text.push_str(&bullet_list(&r.recent_strategies));
                text.push('\n');
            }
            if r.should_strategy_change {
                text.push_str(
                    "\nThe recent strategies are materially the same. Choose a different approach.\n",
                );
            }
            text.push_str(
                "\nSet `should_strategy_change` to true if you are changing approach.",
            );
            sections.push(("Reflection Context", text));
        }
        sections.push(("Test Output", self.test_output.clone()));
        sections.push(("CI Logs", self.ci_logs.clone()));
        sections.push(("Repository Files", format_files(self.source_files.iter())));
        sections
    }
}

/// The slice of a plan the Coder works from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairPlan {
    pub analysis: String,
    pub strategy: String,
    pub files_to_modify: Vec<String>,
}

impl From<&PlannerOutput> for RepairPlan {
    fn from(plan: &PlannerOutput) -> Self {
        Self {
            analysis: plan.analysis.clone(),
            strategy: plan.strategy.clone(),
            files_to_modify: plan.files_to_modify.clone(),
        }
    }
}

impl From<&TechnicalPlannerOutput> for RepairPlan {
    fn from(plan: &TechnicalPlannerOutput) -> Self {
        Self {
            analysis: plan.implementation_plan.clone(),
            strategy: plan.strategy.clone(),
            files_to_modify: plan.files_to_modify.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoderInput {
    pub plan: RepairPlan,
    pub target_files: RepoSnapshot,
}

impl CoderInput {
    pub fn assemble(plan: RepairPlan, repo: &RepoSnapshot) -> Self {
        let target_files = repo.select(&plan.files_to_modify);
        Self { plan, target_files }
    }
}

impl RoleInput for CoderInput {
    type Output = CoderOutput;
    const ROLE: AgentRole = AgentRole::Coder;

    fn artifacts(&self) -> Vec<ArtifactKind> {
        vec![ArtifactKind::RepairPlan, ArtifactKind::TargetFiles]
    }

    fn sections(&self) -> Vec<(&'static str, String)> {
        let plan = format!(
            "Analysis: {}\n\nStrategy: {}\n\nFiles to modify: {}",
            self.plan.analysis,
            self.plan.strategy,
            self.plan.files_to_modify.join(", ")
        );
        vec![
            ("Repair Plan", plan),
            ("Repository Files", format_files(self.target_files.iter())),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct TesterInput {
    pub changed_files: Vec<FileChange>,
    pub existing_tests: RepoSnapshot,
    pub coverage_gaps: Vec<String>,
}

impl TesterInput {
    pub fn assemble(
        changed_files: &[FileChange],
        repo: &RepoSnapshot,
        patterns: &FilePatterns,
        coverage_gaps: Vec<String>,
    ) -> Self {
        Self {
            changed_files: changed_files.to_vec(),
            existing_tests: repo.matching(&patterns.tests),
            coverage_gaps,
        }
    }
}

impl RoleInput for TesterInput {
    type Output = TesterOutput;
    const ROLE: AgentRole = AgentRole::Tester;

    fn artifacts(&self) -> Vec<ArtifactKind> {
        vec![
            ArtifactKind::ChangedFiles,
            ArtifactKind::ExistingTests,
            ArtifactKind::CoverageGaps,
        ]
    }

    fn sections(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Modified Code", format_changes(&self.changed_files)),
            ("Existing Tests", format_files(self.existing_tests.iter())),
            ("Coverage Gaps", bullet_list(&self.coverage_gaps)),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct ReviewerInput {
    pub original_files: RepoSnapshot,
    pub changed_files: Vec<FileChange>,
    pub test_output: String,
}

impl ReviewerInput {
    pub fn assemble(
        repo: &RepoSnapshot,
        changed_files: &[FileChange],
        test_output: impl Into<String>,
    ) -> Self {
        let paths: Vec<&str> = changed_files.iter().map(|c| c.path.as_str()).collect();
        Self {
            original_files: repo.select(&paths),
            changed_files: changed_files.to_vec(),
            test_output: test_output.into(),
        }
    }
}

impl RoleInput for ReviewerInput {
    type Output = ReviewerOutput;
    const ROLE: AgentRole = AgentRole::Reviewer;

    fn artifacts(&self) -> Vec<ArtifactKind> {
        vec![
            ArtifactKind::OriginalFiles,
            ArtifactKind::ChangedFiles,
            ArtifactKind::TestOutput,
        ]
    }

    fn sections(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Original Files", format_files(self.original_files.iter())),
            ("Modified Files", format_changes(&self.changed_files)),
            ("Test Output", self.test_output.clone()),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct RequirementsGatherInput {
    pub raw_requirements: String,
    pub history: Vec<ClarificationExchange>,
}

impl RequirementsGatherInput {
    pub fn assemble(raw_requirements: impl Into<String>, history: &[ClarificationExchange]) -> Self {
        Self {
            raw_requirements: raw_requirements.into(),
            history: history.to_vec(),
        }
    }
}

impl RoleInput for RequirementsGatherInput {
    type Output = RequirementsGatherOutput;
    const ROLE: AgentRole = AgentRole::RequirementsGather;

    fn artifacts(&self) -> Vec<ArtifactKind> {
        let mut artifacts = vec![ArtifactKind::RawRequirements];
        if !self.history.is_empty() {
            artifacts.push(ArtifactKind::ClarificationHistory);
        }
        artifacts
    }

    fn sections(&self) -> Vec<(&'static str, String)> {
        let mut sections = vec![("Raw Requirements", self.raw_requirements.clone())];
        if !self.history.is_empty() {
            let qa: Vec<String> = self
                .history
                .iter()
                .map(|e| format!("Q: {}\nA: {}", e.question, e.answer))
                .collect();
            sections.push(("Previous Questions and Answers", qa.join("\n\n")));
        }
        sections
    }
}

#[derive(Debug, Clone)]
pub struct AcceptanceCriteriaInput {
    pub gherkin_scenarios: Vec<String>,
    pub requirements_summary: String,
}

impl AcceptanceCriteriaInput {
    pub fn assemble(gherkin_scenarios: &[String], requirements_summary: impl Into<String>) -> Self {
        Self {
            gherkin_scenarios: gherkin_scenarios.to_vec(),
            requirements_summary: requirements_summary.into(),
        }
    }
}

impl RoleInput for AcceptanceCriteriaInput {
    type Output = AcceptanceCriteriaOutput;
    const ROLE: AgentRole = AgentRole::AcceptanceCriteria;

    fn artifacts(&self) -> Vec<ArtifactKind> {
        vec![
            ArtifactKind::GherkinScenarios,
            ArtifactKind::RequirementsSummary,
        ]
    }

    fn sections(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Requirements Summary", self.requirements_summary.clone()),
            ("Gherkin Scenarios", self.gherkin_scenarios.join("\n\n")),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct ArchitectPlannerInput {
    pub gherkin_scenarios: Vec<String>,
    pub acceptance_criteria: Vec<AcceptanceCriterion>,
    pub source_files: RepoSnapshot,
}

impl ArchitectPlannerInput {
    pub fn assemble(
        gherkin_scenarios: &[String],
        acceptance_criteria: &[AcceptanceCriterion],
        repo: &RepoSnapshot,
        patterns: &FilePatterns,
    ) -> Self {
        Self {
            gherkin_scenarios: gherkin_scenarios.to_vec(),
            acceptance_criteria: acceptance_criteria.to_vec(),
            source_files: repo.matching(&patterns.source),
        }
    }
}

impl RoleInput for ArchitectPlannerInput {
    type Output = ArchitectPlannerOutput;
    const ROLE: AgentRole = AgentRole::ArchitectPlanner;

    fn artifacts(&self) -> Vec<ArtifactKind> {
        vec![
            ArtifactKind::GherkinScenarios,
            ArtifactKind::AcceptanceCriteria,
            ArtifactKind::SourceFiles,
        ]
    }

    fn sections(&self) -> Vec<(&'static str, String)> {
        let criteria: Vec<String> = self
            .acceptance_criteria
            .iter()
            .map(|ac| {
                format!(
                    "- {} ({})\n  Rationale: {}",
                    ac.criterion,
                    ac.test_type.as_str(),
                    ac.rationale
                )
            })
            .collect();
        vec![
            ("Gherkin Scenarios", self.gherkin_scenarios.join("\n\n")),
            ("Acceptance Criteria", criteria.join("\n\n")),
            ("Existing Codebase", format_files(self.source_files.iter())),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct TechnicalPlannerInput {
    pub technical_design: String,
    pub design_decisions: Vec<TechnicalDecision>,
    pub files_to_create: Vec<String>,
    pub files_to_modify: Vec<String>,
    pub target_files: RepoSnapshot,
}

impl TechnicalPlannerInput {
    pub fn assemble(
        technical_design: impl Into<String>,
        design_decisions: &[TechnicalDecision],
        files_to_create: &[String],
        files_to_modify: &[String],
        repo: &RepoSnapshot,
    ) -> Self {
        Self {
            technical_design: technical_design.into(),
            design_decisions: design_decisions.to_vec(),
            files_to_create: files_to_create.to_vec(),
            files_to_modify: files_to_modify.to_vec(),
            target_files: repo.select(files_to_modify),
        }
    }
}

impl RoleInput for TechnicalPlannerInput {
    type Output = TechnicalPlannerOutput;
    const ROLE: AgentRole = AgentRole::TechnicalPlanner;

    fn artifacts(&self) -> Vec<ArtifactKind> {
        vec![
            ArtifactKind::TechnicalDesign,
            ArtifactKind::FileLists,
            ArtifactKind::TargetFiles,
        ]
    }

    fn sections(&self) -> Vec<(&'static str, String)> {
        let decisions: Vec<String> = self
            .design_decisions
            .iter()
            .map(|d| format!("**{}**: {}\nRationale: {}", d.aspect, d.decision, d.rationale))
            .collect();
        vec![
            ("Technical Design", self.technical_design.clone()),
            ("Design Decisions", decisions.join("\n\n")),
            ("Files to Create", self.files_to_create.join(", ")),
            ("Files to Modify", self.files_to_modify.join(", ")),
            (
                "Existing Files (to be modified)",
                format_files(self.target_files.iter()),
            ),
        ]
    }
}

/// Answers chosen for a round of clarification questions, paired in order.
pub fn pair_answers(
    questions: &[ClarificationQuestion],
    answers: &[String],
) -> Vec<ClarificationExchange> {
    questions
        .iter()
        .zip(answers)
        .map(|(q, a)| ClarificationExchange {
            question: q.question.clone(),
            answer: a.clone(),
        })
        .collect()
}
