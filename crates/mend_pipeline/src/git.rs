//! Git and GitHub backed source control.
//!
//! Lands changes with the `git` CLI and reads CI state through `gh`. A pull
//! request is opened on the first pushed handoff and reused afterwards.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::handoff::{CiStatus, HandoffReceipt, HandoffRequest, SourceControl};
use crate::workspace::apply_changes;

/// Source control over a local git checkout.
#[derive(Debug)]
pub struct GitSourceControl {
    root: PathBuf,
    remote: String,
    push: bool,
    pr_number: Mutex<Option<u64>>,
}

impl GitSourceControl {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            remote: "origin".to_string(),
            push: true,
            pr_number: Mutex::new(None),
        }
    }

    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    /// Commit locally only; CI state is then always unknown.
    pub fn local_only(mut self) -> Self {
        self.push = false;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn run(&self, program: &str, args: &[&str]) -> PipelineResult<String> {
        debug!("{} {}", program, args.join(" "));
        let output = Command::new(program)
            .args(args)
            .current_dir(&self.root)
            .output()
            .await
            .map_err(|e| PipelineError::Handoff(format!("failed to run {}: {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::Handoff(format!(
                "{} {} failed: {}",
                program,
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn open_pull_request(&self, request: &HandoffRequest) -> Option<u64> {
        let mut args = vec![
            "pr",
            "create",
            "--title",
            request.pr_title.as_str(),
            "--body",
            request.pr_body.as_str(),
        ];
        if let Some(base) = &request.manifest.target_branch {
            args.extend(["--base", base.as_str()]);
        }
        match self.run("gh", &args).await {
            Ok(url) => {
                let number = pr_number_from_url(&url);
                info!(url = %url, "Opened pull request");
                number
            }
            Err(e) => {
                warn!("Could not open pull request: {}", e);
                None
            }
        }
    }
}

/// PR number from a `.../pull/<n>` URL.
pub fn pr_number_from_url(url: &str) -> Option<u64> {
    url.trim().rsplit('/').next().and_then(|n| n.parse().ok())
}

/// Map `gh pr view --json statusCheckRollup` output to a CI status.
pub fn parse_check_rollup(stdout: &str) -> CiStatus {
    let Ok(value) = serde_json::from_str::<Value>(stdout) else {
        return CiStatus::Unknown;
    };
    let checks = match value.get("statusCheckRollup").and_then(Value::as_array) {
        Some(checks) if !checks.is_empty() => checks,
        _ => return CiStatus::Unknown,
    };

    let mut failed = Vec::new();
    for check in checks {
        let name = check
            .get("name")
            .or_else(|| check.get("context"))
            .and_then(Value::as_str)
            .unwrap_or("check");
        let conclusion = check
            .get("conclusion")
            .or_else(|| check.get("state"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_ascii_uppercase();

        match conclusion.as_str() {
            "" | "PENDING" | "EXPECTED" => return CiStatus::Pending,
            "SUCCESS" | "NEUTRAL" | "SKIPPED" => {}
            other => {
                let url = check.get("detailsUrl").and_then(Value::as_str).unwrap_or("");
                failed.push(format!("{}: {} {}", name, other, url).trim_end().to_string());
            }
        }
    }

    if failed.is_empty() {
        CiStatus::Passed
    } else {
        CiStatus::Failed {
            logs: failed.join("\n"),
        }
    }
}

#[async_trait]
impl SourceControl for GitSourceControl {
    async fn handoff(&self, request: &HandoffRequest) -> PipelineResult<HandoffReceipt> {
        let manifest = &request.manifest;
        apply_changes(&self.root, &manifest.files)?;

        let mut add = vec!["add", "--"];
        add.extend(manifest.files.iter().map(|f| f.path.as_str()));
        self.run("git", &add).await?;
        self.run("git", &["commit", "-m", manifest.commit_message.as_str()])
            .await?;
        let commit_ref = self.run("git", &["rev-parse", "HEAD"]).await?;
        info!(commit = %commit_ref, files = manifest.files.len(), "Committed change");

        let mut receipt = HandoffReceipt::new(commit_ref);
        if !self.push {
            return Ok(receipt);
        }

        let refspec = match &manifest.target_branch {
            Some(branch) => format!("HEAD:{}", branch),
            None => "HEAD".to_string(),
        };
        self.run("git", &["push", self.remote.as_str(), refspec.as_str()])
            .await?;

        let existing = *self.pr_number.lock();
        receipt.pr_number = match existing {
            Some(n) => Some(n),
            None => {
                let opened = self.open_pull_request(request).await;
                *self.pr_number.lock() = opened;
                opened
            }
        };
        Ok(receipt)
    }

    async fn ci_status(&self) -> CiStatus {
        let Some(number) = *self.pr_number.lock() else {
            return CiStatus::Unknown;
        };
        let number = number.to_string();
        match self
            .run("gh", &["pr", "view", number.as_str(), "--json", "statusCheckRollup"])
            .await
        {
            Ok(stdout) => parse_check_rollup(&stdout),
            Err(e) => {
                warn!("Could not read CI status: {}", e);
                CiStatus::Unknown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_check_rollup() {
        assert_eq!(parse_check_rollup("not json"), CiStatus::Unknown);
        assert_eq!(parse_check_rollup(r#"{"statusCheckRollup": []}"#), CiStatus::Unknown);
        assert_eq!(
            parse_check_rollup(
                r#"{"statusCheckRollup": [{"name": "tests", "conclusion": "SUCCESS"}]}"#
            ),
            CiStatus::Passed
        );
        assert_eq!(
            parse_check_rollup(
                r#"{"statusCheckRollup": [{"name": "tests", "status": "IN_PROGRESS", "conclusion": ""}]}"#
            ),
            CiStatus::Pending
        );

        let failed = parse_check_rollup(
            r#"{"statusCheckRollup": [
                {"name": "lint", "conclusion": "SUCCESS"},
                {"name": "tests", "conclusion": "FAILURE", "detailsUrl": "https://ci/1"}
            ]}"#,
        );
        assert_eq!(
            failed,
            CiStatus::Failed {
                logs: "tests: FAILURE https://ci/1".into()
            }
        );
    }

    #[test]
    fn test_pr_number_from_url() {
        assert_eq!(pr_number_from_url("https://github.com/o/r/pull/42\n"), Some(42));
        assert_eq!(pr_number_from_url("no number"), None);
    }

    #[tokio::test]
    async fn test_ci_unknown_before_any_pull_request() {
        let scm = GitSourceControl::new(".").local_only();
        assert_eq!(scm.ci_status().await, CiStatus::Unknown);
    }
}
