//! Plan-act-reflect orchestration loop.
//!
//! One run: ask the model for a plan, execute the tool calls it proposes,
//! feed the results back and ask for a reflection, repeating until the
//! model signals completion or the iteration budget is spent. Every step
//! is emitted as an [`AgentEvent`].
//!
//! Completion is detected by phrase matching on the model's text. It is a
//! heuristic: a reply mentioning "done" in passing ends the run early.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{AgentError, AgentEvent, ConversationState};
use crate::llm::{LlmClient, LlmResponse, Message, ToolCall, ToolDefinition};
use crate::tools::{ToolContext, ToolExecutor, ToolResult};

/// Case-insensitive phrases that end a run.
pub const COMPLETION_PHRASES: [&str; 5] = [
    "task completed",
    "completed successfully",
    "finished",
    "done",
    "accomplished",
];

pub fn signals_completion(text: &str) -> bool {
    let lower = text.to_lowercase();
    COMPLETION_PHRASES.iter().any(|p| lower.contains(p))
}

/// Default system prompt when the configuration does not override it.
pub fn default_system_prompt(agent_name: &str, tool_descriptions: &str) -> String {
    format!(
        "You are {agent_name}, an AI agent that completes tasks by planning, using tools, \
         and reflecting on the results.\n\
         Every tool runs inside your own isolated sandbox; files live under /workspace.\n\n\
         Available tools:\n{tool_descriptions}\n\n\
         Rules:\n\
         - Think step by step and call tools when they help\n\
         - After each round of tool results, reflect on what happened and decide the next step\n\
         - When the task is complete, say \"Task completed\" followed by a short summary"
    )
}

pub struct PlanActAgent {
    session_id: String,
    llm: Arc<dyn LlmClient>,
    executor: Arc<ToolExecutor>,
    system_prompt: String,
    max_iterations: usize,
    conversation: ConversationState,
}

impl PlanActAgent {
    pub fn new(
        session_id: impl Into<String>,
        llm: Arc<dyn LlmClient>,
        executor: Arc<ToolExecutor>,
        system_prompt: String,
        max_iterations: usize,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            llm,
            executor,
            system_prompt,
            max_iterations,
            conversation: ConversationState::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn tool_descriptions(&self) -> String {
        self.executor.registry().tool_descriptions()
    }

    pub fn history(&self) -> Vec<Message> {
        self.conversation.messages().to_vec()
    }

    pub fn clear_history(&mut self) {
        self.conversation.clear();
    }

    /// Runs one agent turn for `user_message`, emitting events to `events`.
    ///
    /// Tool failures are reported as `tool_error` events and never end the
    /// run. A model failure is returned as an error; events already sent
    /// stay sent.
    pub async fn run(
        &mut self,
        user_message: &str,
        events: &mpsc::Sender<AgentEvent>,
    ) -> Result<(), AgentError> {
        info!("Session {}: new task ({} chars)", self.session_id, user_message.len());

        self.conversation.push(Message::user(user_message));
        let tools = self.executor.registry().tool_definitions();

        // PLANNING
        let mut response = self.complete(&tools).await?;
        emit(events, AgentEvent::Plan {
            content: response.text.clone(),
        })
        .await;

        let mut iteration = 0;
        while iteration < self.max_iterations {
            if signals_completion(&response.text) {
                debug!("Session {}: completion signalled", self.session_id);
                break;
            }

            // EXECUTING
            let results = self.execute_calls(&response.tool_calls, events).await;
            self.conversation.push(Message::assistant_with_calls(
                response.text.clone(),
                response.tool_calls.clone(),
            ));
            self.conversation.extend(results);

            // REFLECTING
            response = self.complete(&tools).await?;
            emit(events, AgentEvent::Reflection {
                content: response.text.clone(),
            })
            .await;
            iteration += 1;
        }

        if iteration == self.max_iterations && !signals_completion(&response.text) {
            info!(
                "Session {}: iteration budget ({}) exhausted",
                self.session_id, self.max_iterations
            );
        }

        // DONE
        self.conversation.push(Message::assistant(response.text.clone()));
        emit(events, AgentEvent::Completion {
            content: response.text,
        })
        .await;
        Ok(())
    }

    async fn complete(&self, tools: &[ToolDefinition]) -> Result<LlmResponse, AgentError> {
        let tools = (!tools.is_empty()).then_some(tools);
        let response = self
            .llm
            .complete(&self.system_prompt, self.conversation.messages(), tools)
            .await?;
        Ok(response)
    }

    /// Executes each call in order. Returns one `tool` turn per call.
    async fn execute_calls(
        &self,
        calls: &[ToolCall],
        events: &mpsc::Sender<AgentEvent>,
    ) -> Vec<Message> {
        let context = ToolContext::new(&self.session_id);
        let mut turns = Vec::with_capacity(calls.len());

        for call in calls {
            let arguments = with_session_id(&call.arguments, &self.session_id);
            let result = match self.executor.execute(&context, &call.name, arguments).await {
                Ok(result) => {
                    emit(events, AgentEvent::ToolExecution {
                        tool: call.name.clone(),
                        arguments: call.arguments.clone(),
                        result: result.payload.clone(),
                    })
                    .await;
                    result
                }
                Err(e) => {
                    warn!("Session {}: tool {} failed: {e}", self.session_id, call.name);
                    emit(events, AgentEvent::ToolError {
                        tool: call.name.clone(),
                        error: e.to_string(),
                    })
                    .await;
                    ToolResult::error(e.to_string())
                }
            };
            let content = serde_json::to_string(&result).unwrap_or_default();
            turns.push(Message::tool(call, content));
        }

        turns
    }
}

/// Copy of `arguments` with the owning session id set.
fn with_session_id(arguments: &Value, session_id: &str) -> Value {
    let mut arguments = match arguments {
        Value::Object(_) => arguments.clone(),
        _ => Value::Object(Default::default()),
    };
    arguments["session_id"] = Value::String(session_id.to_string());
    arguments
}

/// Delivery is best effort: a consumer that went away does not stop the run.
async fn emit(events: &mpsc::Sender<AgentEvent>, event: AgentEvent) {
    if events.send(event).await.is_err() {
        debug!("Event receiver dropped");
    }
}
