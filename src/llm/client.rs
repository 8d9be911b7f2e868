//! `LlmClient` trait, the abstraction over completion backends.
//!
//! The agent loop only depends on this trait, so the backend is chosen
//! at start-up and injected.

use async_trait::async_trait;

use super::{LlmError, LlmResponse, Message, ToolDefinition};

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Sends a conversation to the model and returns the response.
    ///
    /// When `tools` is `Some`, tool definitions are included and the
    /// response may contain tool calls. When `None`, the field is omitted.
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<LlmResponse, LlmError>;

    /// Human-readable description of the backend and model.
    ///
    /// Used in status output, e.g. `"codestral-latest @ https://codestral.mistral.ai/v1"`.
    fn description(&self) -> String;
}
