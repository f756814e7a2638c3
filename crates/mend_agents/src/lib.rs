//! # mend_agents
//!
//! Role-scoped agent calls for the mend orchestrator.
//!
//! An agent call is a single request/response exchange with an external
//! completion service. This crate owns everything about one such call:
//!
//! - **Roles**: the closed set of [`AgentRole`]s and what each may see
//! - **Contracts**: typed outputs per role, wrapped in [`AgentOutput`]
//! - **Schemas**: static descriptors the [`ContractValidator`] walks
//! - **Boundaries**: per-role input structs and the checks around them
//! - **Invocation**: [`AgentInvoker`] over a [`CompletionService`]
//!
//! ## Roles
//!
//! | Role | Receives | Produces |
//! |------|----------|----------|
//! | Planner | test output, CI logs, source files, reflection | repair plan |
//! | Coder | plan, files to modify | full-file changes |
//! | Tester | changed files, existing tests, coverage gaps | test files |
//! | Reviewer | originals, changes, test output | verdict |
//! | RequirementsGather | raw requirements, Q&A history | Gherkin scenarios |
//! | AcceptanceCriteria | scenarios, summary | criteria |
//! | ArchitectPlanner | scenarios, criteria, source files | technical design |
//! | TechnicalPlanner | design, file lists, files to modify | implementation steps |
//!
//! DevOps is not model-backed; its contract describes the handoff manifest.

pub mod boundary;
pub mod contracts;
pub mod error;
pub mod invoker;
pub mod mock;
pub mod prompt;
pub mod roles;
pub mod schema;
pub mod service;
pub mod validator;

pub use boundary::{
    check_boundary, ensure_test_targets, pair_answers, AcceptanceCriteriaInput,
    ArchitectPlannerInput, ArtifactKind, ClarificationExchange, CoderInput, FilePatterns,
    PlannerInput, ReflectionContext, RepairPlan, RepoSnapshot, RequirementsGatherInput,
    ReviewerInput, RoleInput, TechnicalPlannerInput, TesterInput,
};
pub use contracts::{
    AcceptanceCriteriaOutput, AcceptanceCriterion, AgentOutput, ArchitectPlannerOutput,
    ClarificationQuestion, CoderOutput, Complexity, FileChange, HandoffManifest,
    ImplementationStep, PlannerOutput, RequirementsGatherOutput, ReviewIssue, ReviewerOutput,
    RoleContract, TechnicalDecision, TechnicalPlannerOutput, TestType, TesterOutput,
};
pub use error::{AgentError, AgentResult};
pub use invoker::{
    AgentInvoker, CompletionService, FailureKind, InvocationFailure, TransportError,
    DEFAULT_TIMEOUT,
};
pub use mock::{MockCompletionService, MockReply};
pub use prompt::{AgentRequest, PromptBook};
pub use roles::AgentRole;
pub use schema::Schema;
pub use service::ClaudeCliService;
pub use validator::{ContractValidator, InvalidValue, SchemaError, TypeMismatch, ValidResult};
