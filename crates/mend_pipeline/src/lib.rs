//! # mend_pipeline
//!
//! Pipeline Orchestrator for mend.
//!
//! - **Bug-fix**: test, plan, code, (test-write), review, hand off, verify;
//!   repeated under the Safety Governor until CI is green or a guard trips.
//! - **Feature**: requirements with clarification, acceptance criteria,
//!   design, implementation plan, implementation and review, each gated by a
//!   checkpoint, then a single handoff.
//!
//! Collaborators sit behind traits: [`SourceControl`] lands changes and
//! reports CI, [`TestRunner`] runs the suite. [`GitSourceControl`] and
//! [`CommandTestRunner`] are the defaults for a real workspace.

pub mod bugfix;
pub mod cancel;
pub mod error;
pub mod feature;
pub mod git;
pub mod handoff;
pub mod orchestrator;
pub mod testrunner;
pub mod workspace;

pub use bugfix::{CI_FAILURE_REASON, CI_MISSING_REASON, CI_PENDING_REASON};
pub use cancel::CancellationFlag;
pub use error::{PipelineError, PipelineResult};
pub use feature::{checkpoint_summary, feature_pr_body, next_step, FeatureStep};
pub use git::{parse_check_rollup, GitSourceControl};
pub use handoff::{
    CiStatus, HandoffReceipt, HandoffRequest, ScriptedSourceControl, SourceControl,
    BUGFIX_PR_TITLE,
};
pub use orchestrator::Orchestrator;
pub use testrunner::{CommandTestRunner, StaticTestRunner, TestReport, TestRunner};
