//! Builtin tool: run a shell command inside the session's sandbox.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::sandbox_failure;
use crate::sandbox::workspace::WORKSPACE_ROOT;
use crate::sandbox::{ExecOptions, SandboxManager};
use crate::tools::{optional_str, required_str, Capability, ToolContext, ToolError};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Upper bound for a model-requested timeout.
const MAX_TIMEOUT_SECS: u64 = 600;

pub struct TerminalTool {
    sandboxes: Arc<SandboxManager>,
}

impl TerminalTool {
    pub fn new(sandboxes: Arc<SandboxManager>) -> Self {
        Self { sandboxes }
    }
}

#[async_trait]
impl Capability for TerminalTool {
    fn name(&self) -> &str {
        "terminal"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the sandbox. Use this to run programs, inspect the \
         environment, install packages, or anything else a terminal can do. Returns the \
         exit code, stdout and stderr."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "cwd": {
                    "type": "string",
                    "description": "Working directory (defaults to /workspace)"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (defaults to 30)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, context: &ToolContext, arguments: Value) -> Result<Value, ToolError> {
        let command = required_str(self.name(), &arguments, "command")?;
        let cwd = optional_str(&arguments, "cwd").unwrap_or(WORKSPACE_ROOT);
        let timeout = arguments
            .get("timeout")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .clamp(1, MAX_TIMEOUT_SECS);

        debug!("terminal [{}] {cwd}$ {command}", context.session_id);

        let argv = ["sh".to_string(), "-c".to_string(), command.to_string()];
        let options = ExecOptions::in_dir(cwd).with_timeout(Duration::from_secs(timeout));
        let output = self
            .sandboxes
            .execute_in_sandbox(&context.session_id, &argv, &options)
            .await
            .map_err(|e| sandbox_failure(self.name(), e))?;

        Ok(json!({
            "command": command,
            "cwd": cwd,
            "exit_code": output.exit_code,
            "stdout": output.stdout,
            "stderr": output.stderr,
        }))
    }
}
