//! mend CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error or cancelled run
//! - 2: Invalid arguments
//! - 3: Validation failure
//! - 4: Stopped by a safety guard or the iteration ceiling
//! - 5: Stopped by rejection
//! - 6: Awaiting approval

use std::process::ExitCode;

use clap::Parser;
use mend_core::CoreError;
use mend_pipeline::PipelineError;
use mend_policy::PolicyError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{Cli, Commands};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const VALIDATION_FAILURE: u8 = 3;
    pub const SAFETY_STOP: u8 = 4;
    pub const REJECTED: u8 = 5;
    pub const AWAITING_APPROVAL: u8 = 6;
}

fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "mend=debug,warn" } else { "mend=info,warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // Logs go to stderr so stdout stays clean for `status --json`.
    let result = if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .with(filter)
            .try_init()
    };

    if result.is_err() {
        // Logging already initialized, continue
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    let result = match cli.command {
        Commands::Fix(args) => commands::fix::execute(args).await,
        Commands::Feature(args) => commands::feature::execute(args).await,
        Commands::Approve(args) => commands::decide::approve(args).await,
        Commands::Reject(args) => commands::decide::reject(args).await,
        Commands::Answer(args) => commands::decide::answer(args).await,
        Commands::Status(args) => commands::status::execute(args).await,
        Commands::Validate(args) => commands::validate::execute(args).await,
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(err) = cause.downcast_ref::<PolicyError>() {
            return match err {
                PolicyError::InvalidDecision { .. } | PolicyError::AnswerCount { .. } => {
                    ExitCodes::INVALID_ARGS
                }
                PolicyError::Core(_) => ExitCodes::GENERAL_ERROR,
            };
        }
        if let Some(err) = cause.downcast_ref::<PipelineError>() {
            match err {
                PipelineError::NotResumable(..) => return ExitCodes::INVALID_ARGS,
                PipelineError::Agent(_) => return ExitCodes::VALIDATION_FAILURE,
                _ => {}
            }
        }
        if let Some(err) = cause.downcast_ref::<CoreError>() {
            match err {
                CoreError::RunNotFound(_) | CoreError::RunFinished(_) => {
                    return ExitCodes::INVALID_ARGS
                }
                CoreError::Config(_) => return ExitCodes::VALIDATION_FAILURE,
                _ => {}
            }
        }
    }
    ExitCodes::GENERAL_ERROR
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_answer_collects_repeated_flags() {
        let cli = Cli::try_parse_from([
            "mend", "answer", "run-1", "--answer", "Integers", "--answer", "Yes",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Answer(_)));
    }

    #[test]
    fn test_feature_requires_text_or_file() {
        assert!(Cli::try_parse_from(["mend", "feature"]).is_err());
        assert!(Cli::try_parse_from(["mend", "feature", "Add power()"]).is_ok());
        assert!(Cli::try_parse_from(["mend", "feature", "--file", "req.md"]).is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_role() {
        assert!(Cli::try_parse_from(["mend", "validate", "--role", "janitor", "x.json"]).is_err());
        assert!(Cli::try_parse_from(["mend", "validate", "--role", "architect-planner", "x.json"]).is_ok());
    }

    #[test]
    fn test_categorize_policy_errors() {
        let err = anyhow::Error::new(PolicyError::AnswerCount {
            expected: 2,
            found: 1,
        });
        assert_eq!(categorize_error(&err), ExitCodes::INVALID_ARGS);
    }

    #[test]
    fn test_categorize_wrapped_core_errors() {
        let err = anyhow::Error::new(CoreError::Config("max_iterations must be at least 1".into()))
            .context("Invalid run configuration");
        assert_eq!(categorize_error(&err), ExitCodes::VALIDATION_FAILURE);

        let err = anyhow::Error::new(PipelineError::Core(CoreError::RunNotFound("abc".into())));
        // Source chains through the pipeline wrapper
        assert_eq!(categorize_error(&err), ExitCodes::INVALID_ARGS);
    }

    #[test]
    fn test_categorize_unknown_errors() {
        let err = anyhow::anyhow!("something broke");
        assert_eq!(categorize_error(&err), ExitCodes::GENERAL_ERROR);
    }
}
