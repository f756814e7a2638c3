//! CLI command definitions.
//!
//! Each subcommand maps to one orchestrator entry point. Commands return the
//! process exit code so run outcomes can be told apart in CI.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use mend_core::{ApprovalMode, PipelineRun, RunConfig, RunPhase, RunStatus, RunStore};
use mend_pipeline::{CancellationFlag, Orchestrator};
use tracing::{debug, warn};

use crate::ExitCodes;

pub mod decide;
pub mod feature;
pub mod fix;
pub mod status;
pub mod validate;

/// mend - multi-agent repair and feature orchestrator
#[derive(Parser)]
#[command(name = "mend")]
#[command(version, about = "mend - multi-agent repair and feature orchestrator")]
#[command(long_about = r#"
mend drives role-scoped AI agents through a bug-fix loop or a gated
feature-development pipeline, under iteration and repetition guards.

WORKFLOWS:
  fix       → Repair failing tests until CI is green or a guard trips
  feature   → Requirements → design → plan → implementation, with checkpoints
  approve   → Approve the checkpoint a run is waiting on
  reject    → Reject it, ending the run
  answer    → Answer pending clarification questions
  status    → Show one run or list all runs
  validate  → Check a JSON file against a role's output contract

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments
  3 - Validation failure
  4 - Stopped by safety guard or max iterations
  5 - Stopped by rejection
  6 - Awaiting approval
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Repair failing tests in the workspace
    Fix(fix::FixArgs),

    /// Develop a feature from raw requirements
    Feature(feature::FeatureArgs),

    /// Approve the pending checkpoint of a run
    Approve(decide::ApproveArgs),

    /// Reject the pending checkpoint of a run
    Reject(decide::RejectArgs),

    /// Answer pending clarification questions
    Answer(decide::AnswerArgs),

    /// Show run status
    Status(status::StatusArgs),

    /// Validate an agent response file against a role contract
    Validate(validate::ValidateArgs),
}

/// Options shared by commands that drive a run.
#[derive(Args, Debug, Clone)]
pub struct RunOptions {
    /// Workspace root
    #[arg(short, long, default_value = ".")]
    pub workspace: PathBuf,

    /// Config file (YAML or TOML); defaults to .mend/config.yaml
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Approve every checkpoint automatically
    #[arg(long)]
    pub auto_approve: bool,

    /// Override the iteration ceiling
    #[arg(long)]
    pub max_iterations: Option<u32>,
}

impl RunOptions {
    pub fn load_config(&self) -> Result<RunConfig> {
        let mut config = RunConfig::resolve(&self.workspace, self.config.as_deref())
            .context("Failed to load run configuration")?;
        if self.auto_approve {
            config = config.with_approval_mode(ApprovalMode::AutoApprove);
        }
        if let Some(max) = self.max_iterations {
            config = config.with_max_iterations(max);
        }
        config.validate().context("Invalid run configuration")?;
        Ok(config)
    }

    pub fn orchestrator(&self) -> Result<Orchestrator> {
        let config = self.load_config()?;
        debug!(?config, "Resolved configuration");
        let orchestrator = Orchestrator::for_workspace(config, &self.workspace);
        watch_ctrl_c(orchestrator.cancellation().clone());
        Ok(orchestrator)
    }
}

/// Cancel the run on Ctrl-C; the orchestrator stops before the next stage.
fn watch_ctrl_c(flag: CancellationFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling after the current stage");
            flag.cancel();
        }
    });
}

pub fn open_store(workspace: &Path) -> RunStore {
    RunStore::new(workspace)
}

/// Exit code for where a run ended up.
pub fn exit_code(run: &PipelineRun) -> u8 {
    match run.phase() {
        RunPhase::Running => ExitCodes::GENERAL_ERROR,
        RunPhase::AwaitingApproval(_) => ExitCodes::AWAITING_APPROVAL,
        RunPhase::Finished(outcome) => match outcome.status {
            RunStatus::Succeeded => ExitCodes::SUCCESS,
            RunStatus::StoppedBySafety | RunStatus::MaxIterationsReached => ExitCodes::SAFETY_STOP,
            RunStatus::StoppedByRejection => ExitCodes::REJECTED,
            RunStatus::Cancelled => ExitCodes::GENERAL_ERROR,
        },
    }
}

/// Print where a run ended up and return its exit code.
pub fn report(run: &PipelineRun) -> u8 {
    println!("Run {} ({})", run.id(), run.kind());
    match run.phase() {
        RunPhase::Running => println!("   Still running"),
        RunPhase::AwaitingApproval(pending) => {
            println!("⏸️  Awaiting approval at {}", pending.checkpoint);
            if !pending.summary.is_empty() {
                println!();
                for line in pending.summary.lines() {
                    println!("   {}", line);
                }
            }
            for (i, q) in pending.questions.iter().enumerate() {
                println!();
                println!("   Q{}: {}", i + 1, q.question);
                for answer in &q.suggested_answers {
                    println!("       - {}", answer);
                }
            }
            println!();
            println!("   Continue with: mend approve {} | mend reject {} --feedback <text>", run.id(), run.id());
        }
        RunPhase::Finished(outcome) => {
            let icon = if outcome.status.is_success() { "✅" } else { "❌" };
            println!("{} {}: {}", icon, outcome.status, outcome.reason);
            if let Some(record) = &outcome.last_iteration {
                println!(
                    "   Last iteration #{}: {:?}, strategy: {}",
                    record.index,
                    record.verdict,
                    if record.strategy.is_empty() { "-" } else { &record.strategy }
                );
            }
            if let Some(commit) = &outcome.commit_ref {
                println!("   Commit: {}", commit);
            }
        }
    }
    exit_code(run)
}
