//! Run configuration.
//!
//! Loaded from YAML or TOML (picked by file extension), defaulting when no
//! file exists, then adjusted by environment overrides:
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `MEND_AUTO_APPROVE` | `1`/`true` forces auto-approve, `0`/`false` forces interactive |
//! | `CI` | `true` forces auto-approve |
//! | `MEND_MAX_ITERATIONS` | overrides `max_iterations` |

use std::path::{Path, PathBuf};

use mend_agents::FilePatterns;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, CoreResult};

/// Default config location relative to the workspace root.
pub const DEFAULT_CONFIG_PATH: &str = ".mend/config.yaml";

/// How checkpoints are decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// Suspend at each checkpoint until an external decision arrives.
    #[default]
    Interactive,
    /// Approve every checkpoint and answer clarifications deterministically.
    AutoApprove,
}

impl ApprovalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalMode::Interactive => "interactive",
            ApprovalMode::AutoApprove => "auto_approve",
        }
    }
}

impl std::fmt::Display for ApprovalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Iteration ceiling, also bounding clarification rounds.
    pub max_iterations: u32,
    /// Consecutive applied changes that count as a runaway loop.
    pub runaway_commit_threshold: u32,
    /// Strategies compared by the repetition guard.
    pub strategy_repetition_window: usize,
    /// Jaccard threshold for two strategies to count as the same.
    pub similarity_threshold: f64,
    pub runaway_guard: bool,
    pub repetition_guard: bool,
    pub approval_mode: ApprovalMode,
    /// Per agent call, in seconds.
    pub agent_timeout_secs: u64,
    /// Branch handed to the source-control collaborator.
    pub target_branch: Option<String>,
    /// Treat pending or missing CI checks as failed.
    pub require_ci_pass: bool,
    /// How long to poll for settled CI checks after a handoff, in seconds.
    pub ci_wait_secs: u64,
    /// Delay between CI polls, in milliseconds.
    pub ci_poll_ms: u64,
    #[serde(rename = "files")]
    pub patterns: FilePatterns,
    /// Directory of `<role>.md` prompt overrides.
    pub template_dir: Option<PathBuf>,
    /// Completion service executable.
    pub agent_binary: String,
    /// Test command run at the start of each bug-fix iteration.
    pub test_command: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            runaway_commit_threshold: 7,
            strategy_repetition_window: 3,
            similarity_threshold: 0.8,
            runaway_guard: true,
            repetition_guard: true,
            approval_mode: ApprovalMode::Interactive,
            agent_timeout_secs: 300,
            target_branch: None,
            require_ci_pass: false,
            ci_wait_secs: 30,
            ci_poll_ms: 5_000,
            patterns: FilePatterns::default(),
            template_dir: None,
            agent_binary: "claude".to_string(),
            test_command: vec!["pytest".to_string()],
        }
    }
}

impl RunConfig {
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_runaway_threshold(mut self, threshold: u32) -> Self {
        self.runaway_commit_threshold = threshold;
        self
    }

    pub fn with_approval_mode(mut self, mode: ApprovalMode) -> Self {
        self.approval_mode = mode;
        self
    }

    pub fn with_target_branch(mut self, branch: impl Into<String>) -> Self {
        self.target_branch = Some(branch.into());
        self
    }

    /// Poll CI for up to `secs` seconds after each handoff.
    pub fn with_ci_wait(mut self, secs: u64) -> Self {
        self.ci_wait_secs = secs;
        self
    }

    pub fn with_require_ci_pass(mut self, required: bool) -> Self {
        self.require_ci_pass = required;
        self
    }

    /// Load from a YAML or TOML file.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_lowercase();

        let config: Self = match ext.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            "toml" => toml::from_str(&content)?,
            other => {
                return Err(CoreError::config(format!(
                    "unsupported config format '{}' for {}",
                    other,
                    path.display()
                )))
            }
        };
        debug!(path = %path.display(), "Loaded run configuration");
        Ok(config)
    }

    /// Load `path` when given, else the workspace default if it exists, else defaults.
    /// Environment overrides are applied and the result validated.
    pub fn resolve(workspace: &Path, path: Option<&Path>) -> CoreResult<Self> {
        let mut config = match path {
            Some(p) => Self::load(p)?,
            None => {
                let default_path = workspace.join(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::load(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_from(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> CoreResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("MEND_AUTO_APPROVE") {
            match parse_flag(&value) {
                Some(true) => self.approval_mode = ApprovalMode::AutoApprove,
                Some(false) => self.approval_mode = ApprovalMode::Interactive,
                None => {
                    return Err(CoreError::config(format!(
                        "MEND_AUTO_APPROVE must be a boolean, got '{}'",
                        value
                    )))
                }
            }
        }

        if lookup("CI").as_deref().and_then(parse_flag) == Some(true) {
            self.approval_mode = ApprovalMode::AutoApprove;
        }

        if let Some(value) = lookup("MEND_MAX_ITERATIONS") {
            self.max_iterations = value.trim().parse().map_err(|_| {
                CoreError::config(format!(
                    "MEND_MAX_ITERATIONS must be a positive integer, got '{}'",
                    value
                ))
            })?;
        }
        Ok(())
    }

    /// Check bounds.
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_iterations < 1 {
            return Err(CoreError::config("max_iterations must be at least 1"));
        }
        if self.runaway_commit_threshold < 1 {
            return Err(CoreError::config(
                "runaway_commit_threshold must be at least 1",
            ));
        }
        if self.strategy_repetition_window < 2 {
            return Err(CoreError::config(
                "strategy_repetition_window must be at least 2",
            ));
        }
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(CoreError::config(
                "similarity_threshold must be in (0, 1]",
            ));
        }
        if self.agent_timeout_secs == 0 {
            return Err(CoreError::config("agent_timeout_secs must be positive"));
        }
        if self.ci_wait_secs > 0 && self.ci_poll_ms == 0 {
            return Err(CoreError::config(
                "ci_poll_ms must be positive when ci_wait_secs is set",
            ));
        }
        if self.test_command.is_empty() {
            return Err(CoreError::config("test_command must not be empty"));
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
