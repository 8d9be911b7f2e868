//! Builtin tool: browse the web from inside the sandbox.
//!
//! `navigate` fetches a page with `curl` in the session's container (so
//! traffic leaves through the sandbox network and proxy, not the host)
//! and converts HTML to readable text. `status` reports whether the
//! sandbox's Chrome instance and its remote-debugging port are up.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::sandbox_failure;
use crate::sandbox::{ExecOptions, SandboxManager};
use crate::tools::{optional_str, required_str, Capability, ToolContext, ToolError};

/// Maximum response body curl will download (5 MB).
const MAX_RESPONSE_SIZE: usize = 5 * 1024 * 1024;

/// Maximum text returned to the model (in characters).
const MAX_TEXT_OUTPUT: usize = 20_000;

const FETCH_TIMEOUT_SECS: u64 = 30;

/// Text wrapping width for html2text conversion.
const TEXT_WIDTH: usize = 100;

const USER_AGENT: &str = "SandboxAgent/0.1";

const DEBUG_PORT: u16 = 9222;

/// Separates the body from the trailer written by `curl -w`.
const TRAILER_MARKER: &str = "\n__SANDBOX_AGENT_CONTENT_TYPE__:";

pub struct BrowserTool {
    sandboxes: Arc<SandboxManager>,
}

impl BrowserTool {
    pub fn new(sandboxes: Arc<SandboxManager>) -> Self {
        Self { sandboxes }
    }

    async fn navigate(&self, context: &ToolContext, url_str: &str) -> Result<Value, ToolError> {
        let parsed = url::Url::parse(url_str)
            .map_err(|e| ToolError::invalid(self.name(), format!("invalid URL: {e}")))?;
        match parsed.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(ToolError::invalid(
                    self.name(),
                    format!("unsupported scheme '{scheme}' (only http/https)"),
                ))
            }
        }

        debug!("browser [{}] navigate {url_str}", context.session_id);

        let max_size = MAX_RESPONSE_SIZE.to_string();
        let max_time = FETCH_TIMEOUT_SECS.to_string();
        let write_out = format!("{TRAILER_MARKER}%{{content_type}}");
        let argv: Vec<String> = [
            "curl",
            "-sSL",
            "--max-redirs",
            "5",
            "--max-filesize",
            max_size.as_str(),
            "--max-time",
            max_time.as_str(),
            "-A",
            USER_AGENT,
            "-w",
            write_out.as_str(),
            parsed.as_str(),
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        // Leave curl room to hit its own deadline first
        let options = ExecOptions::default().with_timeout(Duration::from_secs(FETCH_TIMEOUT_SECS + 5));
        let output = self
            .sandboxes
            .execute_in_sandbox(&context.session_id, &argv, &options)
            .await
            .map_err(|e| sandbox_failure(self.name(), e))?;

        if !output.success() {
            return Err(ToolError::execution(
                self.name(),
                format!("fetch failed: {}", output.stderr.trim()),
            ));
        }

        let (body, content_type) = split_trailer(&output.stdout);
        let content_type = if content_type.is_empty() { "text/html" } else { content_type };
        let text = extract_text(content_type, body);
        let (content, truncated) = truncate(&text);

        Ok(json!({
            "url": parsed.as_str(),
            "content_type": content_type,
            "content": content,
            "truncated": truncated,
        }))
    }

    async fn status(&self, context: &ToolContext) -> Result<Value, ToolError> {
        let probe = |cmd: &str| vec!["sh".to_string(), "-c".to_string(), cmd.to_string()];
        let chrome = probe("pgrep -f chrome > /dev/null");
        let port = probe(&format!(
            "(netstat -tln 2>/dev/null || ss -tln 2>/dev/null) | grep -q ':{DEBUG_PORT} '"
        ));

        let mut running = Vec::with_capacity(2);
        for argv in [chrome, port] {
            let output = self
                .sandboxes
                .execute_in_sandbox(&context.session_id, &argv, &ExecOptions::default())
                .await
                .map_err(|e| sandbox_failure(self.name(), e))?;
            running.push(output.success());
        }

        Ok(json!({
            "chrome_running": running[0],
            "debug_port_open": running[1],
            "debug_port": DEBUG_PORT,
        }))
    }
}

/// Splits curl's stdout into the body and the `-w` content type trailer.
fn split_trailer(stdout: &str) -> (&str, &str) {
    match stdout.rfind(TRAILER_MARKER) {
        Some(idx) => (&stdout[..idx], stdout[idx + TRAILER_MARKER.len()..].trim()),
        None => (stdout, ""),
    }
}

fn is_html(content_type: &str) -> bool {
    let ct = content_type.to_lowercase();
    ct.contains("text/html") || ct.contains("application/xhtml")
}

fn extract_text(content_type: &str, body: &str) -> String {
    if is_html(content_type) {
        html2text::from_read(body.as_bytes(), TEXT_WIDTH).unwrap_or_else(|_| body.to_string())
    } else {
        body.to_string()
    }
}

/// Truncates at a character boundary; returns whether anything was cut.
fn truncate(text: &str) -> (String, bool) {
    if text.chars().count() > MAX_TEXT_OUTPUT {
        (text.chars().take(MAX_TEXT_OUTPUT).collect(), true)
    } else {
        (text.to_string(), false)
    }
}

#[async_trait]
impl Capability for BrowserTool {
    fn name(&self) -> &str {
        "browser"
    }

    fn description(&self) -> &str {
        "Browse the web from the sandbox. Use action 'navigate' with a URL to read a \
         page as plain text, or 'status' to check whether the sandbox browser is running."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["navigate", "status"],
                    "description": "What to do (defaults to navigate)"
                },
                "url": {
                    "type": "string",
                    "description": "The URL to open (http:// or https://)"
                }
            }
        })
    }

    async fn execute(&self, context: &ToolContext, arguments: Value) -> Result<Value, ToolError> {
        match optional_str(&arguments, "action").unwrap_or("navigate") {
            "navigate" => {
                let url = required_str(self.name(), &arguments, "url")?;
                self.navigate(context, url).await
            }
            "status" => self.status(context).await,
            other => Err(ToolError::invalid(
                self.name(),
                format!("unknown action '{other}', expected navigate or status"),
            )),
        }
    }
}
