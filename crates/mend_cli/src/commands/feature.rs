//! Feature command - run the feature-development pipeline.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use super::{report, RunOptions};

#[derive(Args)]
pub struct FeatureArgs {
    /// Raw requirements text
    #[arg(required_unless_present = "file")]
    requirements: Option<String>,

    /// Read requirements from a file instead
    #[arg(short, long, conflicts_with = "requirements")]
    file: Option<PathBuf>,

    #[command(flatten)]
    run: RunOptions,
}

pub async fn execute(args: FeatureArgs) -> Result<u8> {
    let requirements = match (&args.requirements, &args.file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read requirements from {}", path.display()))?,
        (None, None) => anyhow::bail!("Missing argument: requirements or --file"),
    };

    info!("Starting feature run in {}", args.run.workspace.display());
    let orchestrator = args.run.orchestrator()?;
    let run = orchestrator.run_feature(requirements).await?;
    Ok(report(&run))
}
