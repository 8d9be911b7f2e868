use serde::Serialize;
use serde_json::Value;

/// Progress events of one agent run, in emission order:
/// `plan → (tool_execution | tool_error)* → reflection → … → completion`.
///
/// Serialized with a `type` tag, e.g. `{"type":"plan","content":"..."}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Plan {
        content: String,
    },
    ToolExecution {
        tool: String,
        arguments: Value,
        result: Value,
    },
    ToolError {
        tool: String,
        error: String,
    },
    Reflection {
        content: String,
    },
    Completion {
        content: String,
    },
    /// Terminal: the language-model service failed and the stream ends.
    Error {
        message: String,
    },
}

impl AgentEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::Plan { .. } => "plan",
            AgentEvent::ToolExecution { .. } => "tool_execution",
            AgentEvent::ToolError { .. } => "tool_error",
            AgentEvent::Reflection { .. } => "reflection",
            AgentEvent::Completion { .. } => "completion",
            AgentEvent::Error { .. } => "error",
        }
    }
}
