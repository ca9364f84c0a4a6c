//! Process-spawning tool adapter.
//!
//! `CommandTool` runs `program args...`, writes the argument mapping as JSON
//! to stdin and reads the result from stdout. A non-zero exit is classified
//! from the process's stderr.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use serde_json::{Map, Value};
use skillflow_core::tool::classify::classify_text;
use skillflow_core::tool::Tool;
use skillflow_types::tool::ToolError;
use tokio::io::AsyncWriteExt;

/// Longest stderr excerpt carried in an error detail.
const MAX_DETAIL_CHARS: usize = 2_000;

/// A tool backed by an external program.
#[derive(Debug, Clone)]
pub struct CommandTool {
    name: String,
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
}

impl CommandTool {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let input = serde_json::to_vec(args)
            .map_err(|e| ToolError::invalid_argument(format!("arguments are not serializable: {e}")))?;

        // The invoker's timeout drops this future; kill_on_drop reaps the child.
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    ToolError::not_found(format!("program '{}' not found", self.program))
                }
                _ => ToolError::unknown(format!("failed to spawn '{}': {e}", self.program)),
            })?;

        // Stdin is fed while stdout and stderr drain, so neither side can
        // block on a full pipe.
        let stdin = child.stdin.take();
        let feed = async move {
            match stdin {
                Some(mut stdin) => {
                    stdin.write_all(&input).await?;
                    stdin.shutdown().await
                }
                None => Ok(()),
            }
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        if let Err(e) = fed {
            // A program that ignores stdin may close it early.
            tracing::debug!(tool = %self.name, error = %e, "stdin closed before arguments were written");
        }
        let output =
            output.map_err(|e| ToolError::unknown(format!("failed to wait for '{}': {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let message = if stderr.trim().is_empty() {
                stdout.trim()
            } else {
                stderr.trim()
            };
            let detail = format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                truncate(message)
            );
            tracing::debug!(tool = %self.name, status = %output.status, "command failed");
            return Err(ToolError::new(classify_text(message), detail));
        }

        let stdout = String::from_utf8(output.stdout)
            .map_err(|_| ToolError::unknown(format!("'{}' wrote non UTF-8 output", self.program)))?;
        Ok(parse_output(&stdout))
    }
}

impl Tool for CommandTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.program
    }

    async fn call(&self, args: &Map<String, Value>, _timeout: Duration) -> Result<Value, ToolError> {
        self.execute(args).await
    }
}

/// Stdout as JSON, else the trimmed text; empty output is `null`.
fn parse_output(stdout: &str) -> Value {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_DETAIL_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(MAX_DETAIL_CHARS).collect();
    cut.push_str("...");
    cut
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
