use crate::tools::{extract_string_arg, extract_u64_arg_opt};
use crate::traits::{Tool, ToolResult};
use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Substrings of commands the tool refuses to run.
const DENIED_PATTERNS: &[&str] = &[
    "rm -rf /",
    "rm -fr /",
    "rm -rf ~",
    "rm -rf *",
    "mkfs",
    "dd if=",
    ":(){ :|:& };:",
    "shutdown",
    "reboot",
    "halt",
    "poweroff",
    "> /dev/sd",
    "of=/dev/sd",
    "chmod -r 777 /",
    "chown -r",
];

pub struct ShellTool {
    workspace: PathBuf,
}

impl ShellTool {
    pub fn new(workspace: impl AsRef<std::path::Path>) -> Self {
        Self {
            workspace: workspace.as_ref().to_path_buf(),
        }
    }

    pub fn is_denied(command: &str) -> bool {
        let normalized = command
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        DENIED_PATTERNS.iter().any(|p| normalized.contains(p))
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the workspace directory"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Shell command to execute"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Seconds before the command is killed (default: 60)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let command = extract_string_arg(&args, "command")?;
        let timeout = extract_u64_arg_opt(&args, "timeout_secs", DEFAULT_TIMEOUT_SECS);

        if Self::is_denied(&command) {
            tracing::warn!(%command, "Refused dangerous shell command");
            return Ok(ToolResult::error(format!(
                "Command refused as potentially destructive: {command}"
            )));
        }

        let output = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&self.workspace)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(Duration::from_secs(timeout), output).await {
            Ok(output) => output,
            Err(_) => {
                return Ok(ToolResult::error(format!(
                    "Command timed out after {timeout}s"
                )));
            }
        };

        match output {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let exit_code = output.status.code();

                if output.status.success() {
                    let result = if stdout.is_empty() { stderr } else { stdout };
                    Ok(ToolResult::success(result).with_data(json!({ "exit_code": exit_code })))
                } else {
                    let error = if stderr.is_empty() {
                        format!("Command failed with status: {}", output.status)
                    } else {
                        stderr
                    };
                    Ok(ToolResult::error(error).with_data(json!({ "exit_code": exit_code })))
                }
            }
            Err(e) => Ok(ToolResult::error(format!(
                "Failed to execute command: {}",
                e
            ))),
        }
    }
}
