mod agent;
mod config;
mod llm;
mod sandbox;
#[cfg(test)]
mod testing;
mod tools;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::agent::{AgentEvent, AgentSession};
use crate::config::Config;
use crate::llm::{ChatCompletionsClient, LlmClient};
use crate::sandbox::{ContainerRuntime, DockerRuntime, SandboxManager, SandboxSettings};
use crate::tools::builtin::register_builtin;
use crate::tools::{ToolExecutor, ToolRegistry};

/// Channel depth between the host loop and the session.
const SESSION_BUFFER: usize = 64;

fn print_help() {
    println!(
        "\
sandbox-agent v{}

An AI agent that plans, runs tools inside a per-session Docker sandbox,
and reflects on the results.

USAGE:
    sandbox-agent [OPTIONS] [CONFIG_PATH]

ARGUMENTS:
    CONFIG_PATH    Path to TOML configuration file [default: config/agent.toml]

OPTIONS:
    -h, --help       Print this help message and exit
    -V, --version    Print version and exit

Each line read from stdin is one user message. Lines starting with '/'
are commands (/help lists them). Every agent event is written to stdout
as one JSON object per line; logs go to stderr.

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG          Log level filter for tracing
                      (e.g. debug, sandbox_agent=debug,warn)
    DOCKER_HOST       Docker daemon address [default: local socket]
    LLM_API_KEY       API key for the chat-completions endpoint
    TAVILY_API_KEY    API key for Tavily web search
    BING_API_KEY      API key for Bing web search

EXAMPLES:
    sandbox-agent                          # uses config/agent.toml
    sandbox-agent /etc/sandbox/agent.toml  # custom config path
    RUST_LOG=debug sandbox-agent           # with debug logging",
        env!("CARGO_PKG_VERSION"),
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --help / --version before anything else
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("sandbox-agent v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {}
        }
    }

    // stdout carries events only
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sandbox_agent=info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/agent.toml".to_string());

    info!("Loading configuration from {config_path}");
    let config = Config::load(&config_path)?;

    info!("Agent: {}", config.agent.name);
    info!("LLM: {} @ {}", config.llm.model, config.llm.api_base);
    info!(
        "Sandbox: image {}, ttl {}m, network {}",
        config.sandbox.image, config.sandbox.ttl_minutes, config.sandbox.network
    );

    // ── Components ─────────────────────────────────────

    let docker = DockerRuntime::connect().context("Cannot connect to Docker")?;
    docker.ping().await.context("Docker daemon is not reachable")?;

    let runtime: Arc<dyn ContainerRuntime> = Arc::new(docker);
    let sandboxes = Arc::new(SandboxManager::new(
        runtime,
        SandboxSettings::from(&config.sandbox),
    ));

    let mut registry = ToolRegistry::new();
    register_builtin(&mut registry, sandboxes.clone(), &config.tools)?;
    info!("Tools: {}", registry.names().join(", "));
    let executor = Arc::new(ToolExecutor::new(Arc::new(registry)));

    let llm: Arc<dyn LlmClient> = Arc::new(ChatCompletionsClient::new(config.llm.clone()));

    // ── Expiry sweep ───────────────────────────────────

    let sweeper = {
        let sandboxes = sandboxes.clone();
        let period = config.sandbox.cleanup_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let reclaimed = sandboxes.cleanup_expired().await;
                if reclaimed > 0 {
                    info!("Reclaimed {reclaimed} expired sandbox(es)");
                }
            }
        })
    };

    // ── Session ────────────────────────────────────────

    let session_id = uuid::Uuid::new_v4().to_string();
    info!("Creating sandbox for session {session_id}...");
    let summary = sandboxes.create_sandbox(&session_id).await?;
    info!(
        "Sandbox ready: {} ({})",
        summary.runtime_info.name, summary.container_id
    );

    let session = AgentSession::new(
        session_id.clone(),
        llm,
        executor,
        sandboxes.clone(),
        &config.agent,
    );
    let (inbound, events) = session.spawn(SESSION_BUFFER);

    let outcome = tokio::select! {
        result = run_host(inbound, events) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, exiting");
            Ok(())
        }
    };

    sweeper.abort();
    let destroyed = sandboxes.shutdown().await;
    info!("Destroyed {destroyed} sandbox(es)");
    outcome
}

/// Pumps stdin lines into the session and session events to stdout until
/// stdin reaches EOF and the session has drained, or the session ends.
async fn run_host(
    inbound: mpsc::Sender<String>,
    mut events: mpsc::Receiver<AgentEvent>,
) -> Result<()> {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut inbound = Some(inbound);

    loop {
        tokio::select! {
            line = stdin.next_line(), if inbound.is_some() => {
                match line.context("Failed to read stdin")? {
                    Some(line) => {
                        if let Some(tx) = inbound.as_ref() {
                            if tx.send(line).await.is_err() {
                                warn!("Session closed, dropping input");
                                inbound = None;
                            }
                        }
                    }
                    None => {
                        debug!("stdin closed");
                        // Dropping the sender lets the session finish queued work
                        inbound = None;
                    }
                }
            }
            event = events.recv() => {
                let Some(event) = event else {
                    info!("Session ended");
                    return Ok(());
                };
                debug!("Event: {}", event.kind());
                if let AgentEvent::Error { ref message } = event {
                    error!("Session failed: {message}");
                }
                let mut line = serde_json::to_string(&event)?;
                line.push('\n');
                stdout.write_all(line.as_bytes()).await?;
                stdout.flush().await?;
            }
        }
    }
}
