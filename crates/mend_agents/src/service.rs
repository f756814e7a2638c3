//! Completion service backed by the `claude` command-line tool.
//!
//! The prompt goes in on stdin and the schema is passed with
//! `--json-schema`. The tool answers with a JSON envelope whose
//! `structured_output` member holds the agent response.

use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::invoker::{CompletionService, TransportError};
use crate::prompt::AgentRequest;

/// Runs each request as one `claude --print` process.
#[derive(Debug, Clone)]
pub struct ClaudeCliService {
    binary: String,
    extra_args: Vec<String>,
}

impl Default for ClaudeCliService {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaudeCliService {
    pub fn new() -> Self {
        Self {
            binary: "claude".to_string(),
            extra_args: Vec::new(),
        }
    }

    /// Use a different executable.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Append extra arguments after the fixed ones.
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn args(&self, request: &AgentRequest) -> Vec<String> {
        let mut args = vec![
            "--print".to_string(),
            "--output-format".to_string(),
            "json".to_string(),
            "--json-schema".to_string(),
            request.schema.to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// Pull the structured response out of the tool's JSON envelope.
pub fn extract_structured_output(stdout: &str) -> Result<Value, TransportError> {
    let envelope: Value = serde_json::from_str(stdout.trim()).map_err(|e| {
        let preview: String = stdout.chars().take(200).collect();
        TransportError::Malformed(format!("stdout is not JSON ({}): {}", e, preview))
    })?;

    match envelope {
        Value::Object(mut map) => map.remove("structured_output").ok_or_else(|| {
            TransportError::Malformed("response envelope has no structured_output".to_string())
        }),
        _ => Err(TransportError::Malformed(
            "response envelope is not an object".to_string(),
        )),
    }
}

#[async_trait]
impl CompletionService for ClaudeCliService {
    fn name(&self) -> &str {
        &self.binary
    }

    async fn complete(&self, request: &AgentRequest) -> Result<Value, TransportError> {
        debug!(binary = %self.binary, role = %request.role, "Spawning completion process");

        let mut child = Command::new(&self.binary)
            .args(self.args(request))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::Unavailable(format!("{}: {}", self.binary, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request.prompt.as_bytes())
                .await
                .map_err(|e| TransportError::Process(format!("writing prompt: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| TransportError::Process(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TransportError::Process(format!(
                "exit status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        extract_structured_output(&String::from_utf8_lossy(&output.stdout))
    }
}
