//! Builtin tool: web search via an external provider.
//!
//! Gives the agent access to current information from the web. Runs on
//! the host, not in the sandbox, since it only needs the provider's API.
//!
//! Supported providers:
//! - **Tavily**: dedicated search API with structured results and an answer
//! - **Bing**: Bing Web Search v7

mod bing;
mod tavily;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::tools::{required_str, Capability, ToolContext, ToolError};

use bing::BingProvider;
use tavily::TavilyProvider;

// ── Normalized types (provider-agnostic) ─────────────────

/// A single search result, normalized across all providers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(super) struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Aggregated search response from any provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(super) struct SearchResponse {
    /// A pre-built answer, if the provider returns one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub results: Vec<SearchResult>,
}

/// Upper bound for one provider request.
const SEARCH_TIMEOUT: Duration = Duration::from_secs(20);

// ── SearchProvider trait ─────────────────────────────────

#[async_trait]
pub(super) trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> anyhow::Result<SearchResponse>;

    /// The provider name (e.g. `"tavily"`, `"bing"`).
    fn provider_name(&self) -> &str;
}

/// Decodes a provider reply. Non-2xx statuses become errors carrying the body.
async fn decode<T: DeserializeOwned>(provider: &str, response: Response) -> anyhow::Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("{provider} API returned {status}: {body}");
    }
    Ok(response.json().await?)
}

// ── SearchTool ───────────────────────────────────────────

pub struct SearchTool {
    provider: Box<dyn SearchProvider>,
}

impl SearchTool {
    /// Creates the tool for the configured provider.
    ///
    /// Unknown providers are an error; configuration validation rejects
    /// them earlier, at load time.
    pub fn new(config: &SearchConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(SEARCH_TIMEOUT)
            .user_agent(concat!("sandbox-agent/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let provider: Box<dyn SearchProvider> = match config.provider.as_str() {
            "tavily" => Box::new(TavilyProvider::new(client, &config.api_key, config.max_results)),
            "bing" => Box::new(BingProvider::new(client, &config.api_key, config.max_results)),
            other => anyhow::bail!(
                "Unsupported search provider: '{other}'. Supported: 'tavily', 'bing'."
            ),
        };
        Ok(Self { provider })
    }

    fn to_payload(query: &str, response: SearchResponse) -> Value {
        let mut payload = json!({
            "query": query,
            "results": response.results,
        });
        if let Some(summary) = response.summary.filter(|s| !s.is_empty()) {
            payload["summary"] = Value::String(summary);
        }
        payload
    }
}

#[async_trait]
impl Capability for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search the web for current information. Use this for recent events, facts \
         you're unsure about, or to find pages to open with the browser tool."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, context: &ToolContext, arguments: Value) -> Result<Value, ToolError> {
        let query = required_str(self.name(), &arguments, "query")?;

        debug!(
            "search [{}] ({}): {query}",
            context.session_id,
            self.provider.provider_name()
        );

        match self.provider.search(query).await {
            Ok(response) => Ok(Self::to_payload(query, response)),
            Err(e) => {
                warn!("Web search failed: {e}");
                Err(ToolError::execution(self.name(), e.to_string()))
            }
        }
    }
}
