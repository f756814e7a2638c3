//! Status command - show one run or list every run in the workspace.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use mend_core::{PipelineRun, RunPhase};
use serde::Serialize;

use super::{exit_code, open_store, report};
use crate::ExitCodes;

#[derive(Args)]
pub struct StatusArgs {
    /// Run to show; lists all runs when omitted
    run_id: Option<String>,

    /// Workspace root
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Print the full run record as JSON
    #[arg(long)]
    json: bool,
}

/// One line of the run listing.
#[derive(Debug, Serialize)]
struct RunSummary {
    id: String,
    kind: String,
    state: String,
    iterations: usize,
    updated_at: DateTime<Utc>,
}

impl RunSummary {
    fn of(run: &PipelineRun) -> Self {
        let state = match run.phase() {
            RunPhase::Running => "running".to_string(),
            RunPhase::AwaitingApproval(p) => format!("awaiting:{}", p.checkpoint),
            RunPhase::Finished(o) => o.status.to_string(),
        };
        Self {
            id: run.id().to_string(),
            kind: run.kind().to_string(),
            state,
            iterations: run.iteration_count(),
            updated_at: run.updated_at(),
        }
    }
}

pub async fn execute(args: StatusArgs) -> Result<u8> {
    let store = open_store(&args.workspace);

    if let Some(run_id) = &args.run_id {
        let run = store
            .load(run_id)
            .with_context(|| format!("Run not found: {}", run_id))?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&run)?);
            return Ok(exit_code(&run));
        }
        return Ok(report(&run));
    }

    let runs = store.list().context("Failed to list runs")?;
    let summaries: Vec<RunSummary> = runs.iter().map(RunSummary::of).collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(ExitCodes::SUCCESS);
    }

    if summaries.is_empty() {
        println!("No runs recorded in {}", args.workspace.display());
        return Ok(ExitCodes::SUCCESS);
    }

    println!("{:<38} {:<12} {:<28} {:>5}  {}", "RUN", "KIND", "STATE", "ITER", "UPDATED");
    for s in &summaries {
        println!(
            "{:<38} {:<12} {:<28} {:>5}  {}",
            s.id,
            s.kind,
            s.state,
            s.iterations,
            s.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(ExitCodes::SUCCESS)
}
