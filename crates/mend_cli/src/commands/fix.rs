//! Fix command - run the bug-fix pipeline.

use anyhow::Result;
use clap::Args;
use tracing::info;

use super::{report, RunOptions};

#[derive(Args)]
pub struct FixArgs {
    /// Short description of the problem
    #[arg(short, long, default_value = "Failing tests")]
    problem: String,

    #[command(flatten)]
    run: RunOptions,
}

pub async fn execute(args: FixArgs) -> Result<u8> {
    info!("Starting bug-fix run in {}", args.run.workspace.display());
    let orchestrator = args.run.orchestrator()?;
    let run = orchestrator.run_bug_fix(args.problem).await?;
    Ok(report(&run))
}
