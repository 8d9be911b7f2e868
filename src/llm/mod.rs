pub mod client;
pub mod openai;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use client::LlmClient;
pub use openai::ChatCompletionsClient;

/// One turn of a conversation.
///
/// `tool_calls` is set on assistant turns that requested tools;
/// `tool_call_id` and `name` are set on `tool` turns carrying a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    pub fn assistant_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new("assistant", content)
        }
    }

    /// Result of a tool call, linked back by call id.
    pub fn tool(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call.id.clone()),
            name: Some(call.name.clone()),
            ..Self::new("tool", content)
        }
    }
}

/// A tool invocation proposed by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// JSON object of named arguments
    pub arguments: serde_json::Value,
}

/// Tool schema advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Normalized completion result.
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[cfg(test)]
impl LlmResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Failures talking to the language-model service. None of them are
/// retried: they end the current agent run.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Language model request failed: {0}")]
    Transport(String),

    #[error("Language model request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Language model API error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("Malformed language model response: {0}")]
    MalformedResponse(String),
}
