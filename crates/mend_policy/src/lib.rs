//! # mend_policy
//!
//! Policy decisions for mend runs:
//!
//! - [`SafetyGovernor`]: iteration ceiling, runaway-commit and repeated-strategy guards
//! - [`ApprovalGate`]: checkpoint approval in interactive or auto-approve mode

pub mod error;
pub mod gate;
pub mod safety;

pub use error::{PolicyError, PolicyResult};
pub use gate::{default_answer, ApprovalGate, Decision, GateDecision, FALLBACK_ANSWER};
pub use safety::{SafetyConfig, SafetyDecision, SafetyGovernor, SafetyState};
