pub mod builtin;
pub mod executor;
pub mod registry;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::llm::ToolDefinition;

pub use executor::ToolExecutor;
pub use registry::ToolRegistry;

/// Runtime context passed to capability execution.
///
/// Carries the owning session so tools can route work into that
/// session's sandbox.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: String,
}

impl ToolContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
        }
    }
}

/// Name, description and parameter schema of a registered capability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl From<CapabilityDescriptor> for ToolDefinition {
    fn from(d: CapabilityDescriptor) -> Self {
        ToolDefinition {
            name: d.name,
            description: d.description,
            parameters: d.parameters,
        }
    }
}

/// A tool the model can invoke.
///
/// All builtin tools (terminal, file, browser, search) implement this
/// trait. The executor calls `execute()` when the model requests a call.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Unique identifier advertised to the model, e.g. `"terminal"`.
    fn name(&self) -> &str;

    /// Tells the model when to use this tool.
    fn description(&self) -> &str;

    /// JSON Schema of the accepted arguments.
    fn parameters_schema(&self) -> Value;

    fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }

    /// Runs the tool and returns its JSON payload.
    async fn execute(&self, context: &ToolContext, arguments: Value) -> Result<Value, ToolError>;
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Tool '{0}' not found")]
    NotFound(String),

    #[error("Tool '{tool}' failed: {message}")]
    Execution { tool: String, message: String },

    #[error("Invalid arguments for tool '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },
}

impl ToolError {
    pub fn execution(tool: &str, message: impl Into<String>) -> Self {
        Self::Execution {
            tool: tool.to_string(),
            message: message.into(),
        }
    }

    pub fn invalid(tool: &str, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Ok,
    Error,
}

/// Outcome of one tool call, folded back into the conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub status: ToolStatus,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(payload: Value) -> Self {
        Self {
            status: ToolStatus::Ok,
            payload,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Error,
            payload: Value::Null,
            error: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ToolStatus::Ok
    }
}

// ── Argument helpers ─────────────────────────────────────

pub(crate) fn required_str<'a>(tool: &str, args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args[key]
        .as_str()
        .ok_or_else(|| ToolError::invalid(tool, format!("missing required parameter: {key}")))
}

pub(crate) fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

pub(crate) fn flag(args: &Value, key: &str) -> bool {
    args.get(key).and_then(Value::as_bool).unwrap_or(false)
}
