use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{error, info};

use super::planact::default_system_prompt;
use super::{AgentEvent, PlanActAgent};
use crate::config::AgentConfig;
use crate::llm::LlmClient;
use crate::sandbox::SandboxManager;
use crate::tools::ToolExecutor;

/// Default tail for `/logs` without an argument.
const DEFAULT_LOG_LINES: usize = 50;

/// A user's conversation with the agent, bound to one sandbox.
///
/// Inbound messages are processed one at a time. Slash commands are
/// answered directly; everything else runs through the plan-act loop.
pub struct AgentSession {
    agent_name: String,
    llm_description: String,
    agent: PlanActAgent,
    sandboxes: Arc<SandboxManager>,
    start_time: Instant,
}

impl AgentSession {
    pub fn new(
        session_id: impl Into<String>,
        llm: Arc<dyn LlmClient>,
        executor: Arc<ToolExecutor>,
        sandboxes: Arc<SandboxManager>,
        config: &AgentConfig,
    ) -> Self {
        let system_prompt = config.system_prompt.clone().unwrap_or_else(|| {
            default_system_prompt(&config.name, &executor.registry().tool_descriptions())
        });
        let llm_description = llm.description();
        Self {
            agent_name: config.name.clone(),
            llm_description,
            agent: PlanActAgent::new(session_id, llm, executor, system_prompt, config.max_iterations),
            sandboxes,
            start_time: Instant::now(),
        }
    }

    pub fn session_id(&self) -> &str {
        self.agent.session_id()
    }

    /// Runs the session on its own task. Dropping the returned sender ends
    /// it; the event receiver yields `None` once it has stopped.
    pub fn spawn(self, buffer: usize) -> (mpsc::Sender<String>, mpsc::Receiver<AgentEvent>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(buffer);
        let (events_tx, events_rx) = mpsc::channel(buffer);
        tokio::spawn(self.run(inbound_rx, events_tx));
        (inbound_tx, events_rx)
    }

    /// Processes messages until the inbound channel closes or the language
    /// model fails. A failure is reported as a single `error` event, after
    /// which `events` is dropped.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<String>, events: mpsc::Sender<AgentEvent>) {
        info!("Session {} started", self.session_id());

        while let Some(message) = inbound.recv().await {
            let body = message.trim();
            if body.is_empty() {
                continue;
            }

            if body.starts_with('/') {
                let content = self.handle_command(body).await;
                let _ = events.send(AgentEvent::Completion { content }).await;
                continue;
            }

            if let Err(e) = self.agent.run(body, &events).await {
                error!("Session {}: model failure: {e}", self.session_id());
                let _ = events
                    .send(AgentEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        }

        info!("Session {} closed", self.session_id());
    }

    // ── Slash commands ───────────────────────────────────

    async fn handle_command(&mut self, body: &str) -> String {
        let parts: Vec<&str> = body.splitn(2, ' ').collect();
        let command = parts[0].to_lowercase();
        let argument = parts.get(1).map(|s| s.trim()).unwrap_or("");

        info!("Slash command in session {}: {command}", self.session_id());

        match command.as_str() {
            "/help" => self.cmd_help(),
            "/ping" => "pong".to_string(),
            "/status" => self.cmd_status().await,
            "/tools" => self.cmd_tools(),
            "/sandbox" => match argument {
                "" => self.cmd_sandbox().await,
                "new" => self.cmd_sandbox_new().await,
                other => format!("Unknown /sandbox argument: {other}\nUsage: /sandbox [new]"),
            },
            "/sandboxes" => self.cmd_sandboxes().await,
            "/logs" => self.cmd_logs(argument).await,
            "/reset" => {
                self.agent.clear_history();
                "Conversation cleared.".to_string()
            }
            _ => format!("Unknown command: {command}\nType /help for available commands."),
        }
    }

    fn cmd_help(&self) -> String {
        "\
Commands:\n\
  /status     Agent info, uptime, sandbox state\n\
  /tools      Tools the agent can use\n\
  /sandbox    This session's sandbox (/sandbox new replaces an expired one)\n\
  /sandboxes  All live sandboxes\n\
  /logs [n]   Last n lines of the sandbox logs (default 50)\n\
  /reset      Clear the conversation\n\
  /ping       Check if the agent is alive\n\
  /help       This message"
            .to_string()
    }

    async fn cmd_status(&self) -> String {
        let uptime = self.start_time.elapsed();
        let hours = uptime.as_secs() / 3600;
        let minutes = (uptime.as_secs() % 3600) / 60;

        let sandbox = match self.sandboxes.get_sandbox(self.session_id()).await {
            Some(record) => format!("{} (expires {})", record.runtime_info.status, record.expires_at),
            None => "none".to_string(),
        };

        format!(
            "{}: status\n\
             Session: {}\n\
             Uptime: {hours}h {minutes}m\n\
             LLM: {}\n\
             Max iterations: {}\n\
             History: {} messages\n\
             Sandbox: {sandbox}",
            self.agent_name,
            self.session_id(),
            self.llm_description,
            self.agent.max_iterations(),
            self.agent.history().len(),
        )
    }

    fn cmd_tools(&self) -> String {
        let tools = self.agent.tool_descriptions();
        if tools.is_empty() {
            "No tools registered.".to_string()
        } else {
            format!("Tools:\n{tools}")
        }
    }

    async fn cmd_sandbox(&self) -> String {
        match self.sandboxes.get_sandbox(self.session_id()).await {
            Some(record) => serde_json::to_string_pretty(&record.summary())
                .unwrap_or_else(|e| format!("Cannot render sandbox: {e}")),
            None => format!("No sandbox for session {}", self.session_id()),
        }
    }

    /// Provisions a replacement after the TTL (or the sweep) reclaimed the
    /// session's sandbox. A live sandbox is left alone.
    async fn cmd_sandbox_new(&self) -> String {
        match self.sandboxes.create_sandbox(self.session_id()).await {
            Ok(summary) => {
                info!(
                    "Session {}: new sandbox {} ({})",
                    self.session_id(),
                    summary.runtime_info.name,
                    summary.container_id
                );
                format!(
                    "Sandbox ready: {} ({}), expires {}",
                    summary.runtime_info.name, summary.container_id, summary.expires_at
                )
            }
            Err(e) => format!("Cannot create sandbox: {e}"),
        }
    }

    async fn cmd_sandboxes(&self) -> String {
        let sandboxes = self.sandboxes.list_sandboxes().await;
        if sandboxes.is_empty() {
            return "No live sandboxes.".to_string();
        }
        let mut out = format!("{} live sandbox(es):", sandboxes.len());
        for s in &sandboxes {
            out.push_str(&format!(
                "\n- {} {} [{}] expires {}",
                s.session_id, s.runtime_info.name, s.status, s.expires_at
            ));
        }
        out
    }

    async fn cmd_logs(&self, argument: &str) -> String {
        let tail = if argument.is_empty() {
            DEFAULT_LOG_LINES
        } else {
            match argument.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => return format!("Invalid line count: {argument}"),
            }
        };
        match self.sandboxes.sandbox_logs(self.session_id(), Some(tail)).await {
            Ok(logs) if logs.trim().is_empty() => "(no log output)".to_string(),
            Ok(logs) => logs,
            Err(e) => format!("Cannot read logs: {e}"),
        }
    }
}
