//! Test execution at the start of each bug-fix iteration.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};

/// Result of one test run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestReport {
    pub passed: bool,
    /// Combined stdout and stderr.
    pub output: String,
}

impl TestReport {
    pub fn passed(output: impl Into<String>) -> Self {
        Self {
            passed: true,
            output: output.into(),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            passed: false,
            output: output.into(),
        }
    }
}

/// Runs the project's test suite.
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(&self) -> PipelineResult<TestReport>;
}

/// Runs a test command in the workspace, e.g. `pytest`.
#[derive(Debug, Clone)]
pub struct CommandTestRunner {
    command: Vec<String>,
    workdir: PathBuf,
}

impl CommandTestRunner {
    pub fn new(command: Vec<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            command,
            workdir: workdir.into(),
        }
    }
}

#[async_trait]
impl TestRunner for CommandTestRunner {
    async fn run(&self) -> PipelineResult<TestReport> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| PipelineError::TestRun("empty test command".to_string()))?;

        info!("Running tests: {}", self.command.join(" "));
        let output = Command::new(program)
            .args(args)
            .current_dir(&self.workdir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PipelineError::TestRun(format!("failed to run {}: {}", program, e)))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            text.push('\n');
            text.push_str(&stderr);
        }
        debug!(exit = ?output.status.code(), "Test command finished");

        Ok(TestReport {
            passed: output.status.success(),
            output: text,
        })
    }
}

/// Replays queued reports, then repeats a fixed one.
#[derive(Debug, Clone)]
pub struct StaticTestRunner {
    queued: Arc<RwLock<VecDeque<TestReport>>>,
    fallback: TestReport,
}

impl StaticTestRunner {
    pub fn new(fallback: TestReport) -> Self {
        Self {
            queued: Arc::new(RwLock::new(VecDeque::new())),
            fallback,
        }
    }

    /// Tests that always fail with `output`.
    pub fn failing(output: impl Into<String>) -> Self {
        Self::new(TestReport::failed(output))
    }

    pub fn then(self, report: TestReport) -> Self {
        self.queued.write().push_back(report);
        self
    }
}

#[async_trait]
impl TestRunner for StaticTestRunner {
    async fn run(&self) -> PipelineResult<TestReport> {
        Ok(self
            .queued
            .write()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_runner_drains_queue_first() {
        let runner = StaticTestRunner::failing("1 failed").then(TestReport::passed("ok"));
        assert!(runner.run().await.unwrap().passed);
        assert!(!runner.run().await.unwrap().passed);
        assert!(!runner.run().await.unwrap().passed);
    }

    #[tokio::test]
    async fn test_empty_command_is_an_error() {
        let runner = CommandTestRunner::new(vec![], ".");
        assert!(matches!(runner.run().await, Err(PipelineError::TestRun(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_exit_status_decides_pass() {
        let dir = tempfile::tempdir().unwrap();
        let ok = CommandTestRunner::new(vec!["true".into()], dir.path());
        assert!(ok.run().await.unwrap().passed);
        let bad = CommandTestRunner::new(vec!["false".into()], dir.path());
        assert!(!bad.run().await.unwrap().passed);
    }
}
