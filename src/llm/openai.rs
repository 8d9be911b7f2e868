//! OpenAI-compatible `/chat/completions` provider.
//!
//! Works against any server speaking the Chat Completions dialect
//! (Mistral/Codestral, OpenAI, vLLM, llama.cpp server, ...).
//!
//! - The system prompt is sent as a leading `role: "system"` message.
//! - Tool definitions use `{type: "function", function: {...}}` with
//!   `tool_choice: "auto"`.
//! - Tool call arguments arrive as a JSON-encoded string and are parsed
//!   here; calls without an id get a synthesized `call_<n>`.
//! - With `stream = true` the completion arrives as server-sent events
//!   terminated by `data: [DONE]`. Text and tool-call fragments are joined
//!   into the same `LlmResponse` the one-shot path returns.
//! - Both paths are bounded by `timeout_secs`, body included.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Event, RequestBuilderExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::client::LlmClient;
use super::{LlmError, LlmResponse, Message, ToolCall, ToolDefinition};
use crate::config::LlmConfig;

const DONE_SENTINEL: &str = "[DONE]";

/// Highest tool-call index accepted in a streamed delta.
const MAX_STREAMED_CALLS: usize = 64;

// ── Wire request types ───────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: WireFunctionDef,
}

#[derive(Debug, Serialize)]
struct WireFunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default = "default_call_type")]
    call_type: String,
    function: WireFunctionCall,
}

fn default_call_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON-encoded string per the API; some servers send an object
    #[serde(default)]
    arguments: serde_json::Value,
}

// ── Wire response types ──────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

// ── Stream assembly ──────────────────────────────────────

/// Joins streamed deltas into one response.
#[derive(Debug, Default)]
struct StreamAccumulator {
    text: String,
    calls: Vec<PartialCall>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl StreamAccumulator {
    fn push(&mut self, chunk: StreamChunk) -> Result<(), LlmError> {
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }
        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(());
        };

        if let Some(text) = choice.delta.content {
            self.text.push_str(&text);
        }
        for delta in choice.delta.tool_calls.unwrap_or_default() {
            if delta.index >= MAX_STREAMED_CALLS {
                return Err(LlmError::MalformedResponse(format!(
                    "tool call index {} out of range",
                    delta.index
                )));
            }
            if self.calls.len() <= delta.index {
                self.calls.resize_with(delta.index + 1, PartialCall::default);
            }
            let call = &mut self.calls[delta.index];
            if delta.id.is_some() {
                call.id = delta.id;
            }
            if let Some(function) = delta.function {
                call.name.push_str(function.name.as_deref().unwrap_or_default());
                call.arguments.push_str(function.arguments.as_deref().unwrap_or_default());
            }
        }
        if choice.finish_reason.is_some() {
            self.finish_reason = choice.finish_reason;
        }
        Ok(())
    }

    fn finish(self) -> Result<LlmResponse, LlmError> {
        let calls = self
            .calls
            .into_iter()
            .map(|call| WireToolCall {
                id: call.id,
                call_type: default_call_type(),
                function: WireFunctionCall {
                    name: call.name,
                    arguments: serde_json::Value::String(call.arguments),
                },
            })
            .collect();
        let (input_tokens, output_tokens) = self
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));

        Ok(LlmResponse {
            text: self.text,
            tool_calls: parse_tool_calls(calls)?,
            finish_reason: self.finish_reason,
            input_tokens,
            output_tokens,
        })
    }
}

// ── ChatCompletionsClient ────────────────────────────────

pub struct ChatCompletionsClient {
    client: Client,
    config: LlmConfig,
    endpoint: String,
}

impl ChatCompletionsClient {
    pub fn new(config: LlmConfig) -> Self {
        let endpoint = format!("{}/chat/completions", config.api_base.trim_end_matches('/'));
        Self {
            client: Client::new(),
            config,
            endpoint,
        }
    }

    fn build_request(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        stream: bool,
    ) -> ChatRequest<'_> {
        let mut wire = Vec::with_capacity(messages.len() + 1);
        if !system_prompt.is_empty() {
            wire.push(WireMessage {
                role: "system".to_string(),
                content: system_prompt.to_string(),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            });
        }
        wire.extend(messages.iter().map(to_wire_message));

        let tools: Option<Vec<WireTool>> = tools.filter(|defs| !defs.is_empty()).map(|defs| {
            defs.iter()
                .map(|td| WireTool {
                    tool_type: "function",
                    function: WireFunctionDef {
                        name: td.name.clone(),
                        description: td.description.clone(),
                        parameters: td.parameters.clone(),
                    },
                })
                .collect()
        });
        let tool_choice = tools.as_ref().map(|_| "auto");

        ChatRequest {
            model: &self.config.model,
            messages: wire,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            tools,
            tool_choice,
            stream,
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout(self.config.timeout())
        } else {
            LlmError::Transport(e.to_string())
        }
    }

    async fn stream_error(&self, e: reqwest_eventsource::Error) -> LlmError {
        match e {
            reqwest_eventsource::Error::InvalidStatusCode(status, response) => LlmError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            },
            reqwest_eventsource::Error::Transport(e) => self.transport_error(e),
            other => LlmError::MalformedResponse(other.to_string()),
        }
    }

    async fn send_once(&self, request: &ChatRequest<'_>) -> Result<LlmResponse, LlmError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.config.api_key)
            .timeout(self.config.timeout())
            .json(request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        parse_response(&body)
    }

    /// Reads the event stream up to `[DONE]` under the call deadline.
    async fn send_streaming(&self, request: &ChatRequest<'_>) -> Result<LlmResponse, LlmError> {
        let mut source = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.config.api_key)
            .timeout(self.config.timeout())
            .json(request)
            .eventsource()
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let mut assembled = StreamAccumulator::default();
        let read = async {
            while let Some(event) = source.next().await {
                match event {
                    Ok(Event::Open) => {}
                    Ok(Event::Message(message)) => {
                        if message.data.trim() == DONE_SENTINEL {
                            break;
                        }
                        assembled.push(parse_stream_chunk(&message.data)?)?;
                    }
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(e) => return Err(self.stream_error(e).await),
                }
            }
            Ok::<(), LlmError>(())
        };
        let outcome = tokio::time::timeout(self.config.timeout(), read).await;
        // The event source reconnects by default; one stream per call here
        source.close();

        match outcome {
            Ok(result) => result?,
            Err(_) => return Err(LlmError::Timeout(self.config.timeout())),
        }
        assembled.finish()
    }
}

#[async_trait]
impl LlmClient for ChatCompletionsClient {
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<LlmResponse, LlmError> {
        let request = self.build_request(system_prompt, messages, tools, self.config.stream);

        debug!(
            "Calling chat completions ({}) with {} messages{}{}",
            self.config.model,
            messages.len(),
            if request.tools.is_some() { " + tools" } else { "" },
            if request.stream { ", streaming" } else { "" }
        );

        let parsed = if request.stream {
            self.send_streaming(&request).await?
        } else {
            self.send_once(&request).await?
        };

        info!(
            "LLM response ({}): {} in / {} out tokens, {} tool call(s)",
            parsed.finish_reason.as_deref().unwrap_or("unknown"),
            parsed.input_tokens,
            parsed.output_tokens,
            parsed.tool_calls.len()
        );
        Ok(parsed)
    }

    fn description(&self) -> String {
        format!("{} @ {}", self.config.model, self.config.api_base)
    }
}

// ── Translation helpers ──────────────────────────────────

fn to_wire_message(msg: &Message) -> WireMessage {
    let tool_calls = (!msg.tool_calls.is_empty()).then(|| {
        msg.tool_calls
            .iter()
            .map(|tc| WireToolCall {
                id: Some(tc.id.clone()),
                call_type: default_call_type(),
                function: WireFunctionCall {
                    name: tc.name.clone(),
                    arguments: serde_json::Value::String(tc.arguments.to_string()),
                },
            })
            .collect()
    });

    WireMessage {
        role: msg.role.clone(),
        content: msg.content.clone(),
        tool_calls,
        tool_call_id: msg.tool_call_id.clone(),
        name: msg.name.clone(),
    }
}

fn parse_response(body: &str) -> Result<LlmResponse, LlmError> {
    let resp: ChatResponse =
        serde_json::from_str(body).map_err(|e| LlmError::MalformedResponse(e.to_string()))?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::MalformedResponse("response has no choices".to_string()))?;

    let tool_calls = parse_tool_calls(choice.message.tool_calls.unwrap_or_default())?;
    let (input_tokens, output_tokens) = resp
        .usage
        .map(|u| (u.prompt_tokens, u.completion_tokens))
        .unwrap_or((0, 0));

    Ok(LlmResponse {
        text: choice.message.content.unwrap_or_default(),
        tool_calls,
        finish_reason: choice.finish_reason,
        input_tokens,
        output_tokens,
    })
}

fn parse_tool_calls(calls: Vec<WireToolCall>) -> Result<Vec<ToolCall>, LlmError> {
    calls
        .into_iter()
        .enumerate()
        .map(|(i, call)| {
            let arguments = parse_arguments(&call.function.name, call.function.arguments)?;
            let id = call
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| format!("call_{i}"));
            Ok(ToolCall {
                id,
                name: call.function.name,
                arguments,
            })
        })
        .collect()
}

fn parse_arguments(tool: &str, raw: serde_json::Value) -> Result<serde_json::Value, LlmError> {
    let value = match raw {
        serde_json::Value::Null => return Ok(serde_json::json!({})),
        serde_json::Value::String(s) if s.trim().is_empty() => return Ok(serde_json::json!({})),
        serde_json::Value::String(s) => serde_json::from_str(&s).map_err(|e| {
            LlmError::MalformedResponse(format!("invalid arguments for tool '{tool}': {e}"))
        })?,
        other => other,
    };

    if value.is_object() {
        Ok(value)
    } else {
        Err(LlmError::MalformedResponse(format!(
            "arguments for tool '{tool}' are not a JSON object"
        )))
    }
}

fn parse_stream_chunk(data: &str) -> Result<StreamChunk, LlmError> {
    serde_json::from_str(data).map_err(|e| LlmError::MalformedResponse(e.to_string()))
}
