//! Validate command - check a saved agent response against its role contract.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use mend_agents::{AgentRole, ContractValidator};

use crate::ExitCodes;

#[derive(Args)]
pub struct ValidateArgs {
    /// Role whose contract applies (planner, coder, tester, reviewer, ...)
    #[arg(short, long)]
    role: AgentRole,

    /// File holding the raw response
    file: PathBuf,
}

pub async fn execute(args: ValidateArgs) -> Result<u8> {
    let raw = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;

    match ContractValidator::validate(args.role, &raw) {
        Ok(output) => {
            println!("✅ Valid {} response", output.role());
            Ok(ExitCodes::SUCCESS)
        }
        Err(err) => {
            println!("❌ Invalid {} response", args.role);
            if let Some(container) = &err.container {
                println!("   {}", container);
            }
            for field in &err.missing_fields {
                println!("   missing: {}", field);
            }
            for m in &err.type_mismatches {
                println!("   {}: expected {}, found {}", m.field, m.expected, m.found);
            }
            for v in &err.invalid_values {
                println!("   {}: '{}' not in [{}]", v.field, v.value, v.allowed.join(", "));
            }
            Ok(ExitCodes::VALIDATION_FAILURE)
        }
    }
}
