//! Approve, reject and answer commands - resume a suspended feature run.

use anyhow::{Context, Result};
use clap::Args;
use mend_policy::Decision;
use tracing::info;

use super::{open_store, report, RunOptions};

#[derive(Args)]
pub struct ApproveArgs {
    /// Run to resume
    run_id: String,

    #[command(flatten)]
    run: RunOptions,
}

#[derive(Args)]
pub struct RejectArgs {
    /// Run to resume
    run_id: String,

    /// Why the checkpoint is rejected
    #[arg(short, long)]
    feedback: String,

    #[command(flatten)]
    run: RunOptions,
}

#[derive(Args)]
pub struct AnswerArgs {
    /// Run to resume
    run_id: String,

    /// One answer per pending question, in order
    #[arg(short, long = "answer", required = true)]
    answers: Vec<String>,

    #[command(flatten)]
    run: RunOptions,
}

async fn resume(run_id: &str, options: &RunOptions, decision: Decision) -> Result<u8> {
    let store = open_store(&options.workspace);
    let run = store
        .load(run_id)
        .with_context(|| format!("Run not found: {}", run_id))?;
    info!(run_id, "Resuming run");

    let orchestrator = options.orchestrator()?;
    let run = orchestrator.resume(run, decision).await?;
    Ok(report(&run))
}

pub async fn approve(args: ApproveArgs) -> Result<u8> {
    resume(&args.run_id, &args.run, Decision::Approve).await
}

pub async fn reject(args: RejectArgs) -> Result<u8> {
    let decision = Decision::Reject {
        feedback: args.feedback,
    };
    resume(&args.run_id, &args.run, decision).await
}

pub async fn answer(args: AnswerArgs) -> Result<u8> {
    let decision = Decision::Answer {
        answers: args.answers,
    };
    resume(&args.run_id, &args.run, decision).await
}
