//! # mend_core
//!
//! Run model for the mend orchestrator.
//!
//! - [`PipelineRun`]: the unit of work, its phase and terminal outcome
//! - [`ReflectionTracker`]: per-run iteration history and Planner summaries
//! - [`RunConfig`]: guard thresholds and approval mode
//! - [`RunStore`]: JSON persistence under `.mend/runs/`

pub mod config;
pub mod error;
pub mod persistence;
pub mod reflection;
pub mod run;
pub mod similarity;

pub use config::{ApprovalMode, RunConfig, DEFAULT_CONFIG_PATH};
pub use error::{CoreError, CoreResult};
pub use persistence::RunStore;
pub use reflection::{ReflectionTracker, DEFAULT_WINDOW};
pub use run::{
    ApprovalRecord, Checkpoint, FeatureState, HaltReason, IterationDraft, IterationRecord,
    PendingApproval, PipelineKind, PipelineRun, ReviewVerdict, RunOutcome, RunPhase, RunStatus,
    Stage, StageRecord,
};
pub use similarity::{jaccard, StrategySimilarity, DEFAULT_SIMILARITY_THRESHOLD};
