use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_agent_name")]
    pub name: String,
    /// Upper bound on reflection rounds per user message
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Replaces the built-in system prompt when set
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            max_iterations: default_max_iterations(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API, without `/chat/completions`
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Supports ${ENV_VAR} substitution
    pub api_key: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Deadline for one completion call, streamed or not
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    /// Receive completions as server-sent events
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
    #[serde(default = "default_network")]
    pub network: String,
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: u64,
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,
    #[serde(default = "default_ready_poll_interval")]
    pub ready_poll_interval_ms: u64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
    #[serde(default = "default_cpu_cores")]
    pub cpu_cores: f32,
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,
    #[serde(default = "default_shm_size_mb")]
    pub shm_size_mb: u64,
    #[serde(default = "default_cap_add")]
    pub cap_add: Vec<String>,
    /// Control ports published on runtime-assigned host ports
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub http_proxy: Option<String>,
    #[serde(default)]
    pub https_proxy: Option<String>,
    #[serde(default)]
    pub no_proxy: Option<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            name_prefix: default_name_prefix(),
            network: default_network(),
            ttl_minutes: default_ttl_minutes(),
            ready_timeout_secs: default_ready_timeout(),
            ready_poll_interval_ms: default_ready_poll_interval(),
            cleanup_interval_secs: default_cleanup_interval(),
            stop_timeout_secs: default_stop_timeout(),
            cpu_cores: default_cpu_cores(),
            memory_mb: default_memory_mb(),
            shm_size_mb: default_shm_size_mb(),
            cap_add: default_cap_add(),
            ports: default_ports(),
            http_proxy: None,
            https_proxy: None,
            no_proxy: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ToolsConfig {
    /// Web search is only registered when this section is present
    #[serde(default)]
    pub search: Option<SearchConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    /// "tavily" or "bing"
    pub provider: String,
    /// Supports ${ENV_VAR} substitution
    pub api_key: String,
    #[serde(default = "default_max_results")]
    pub max_results: u8,
}

fn default_agent_name() -> String {
    "Sandbox Agent".to_string()
}

fn default_max_iterations() -> usize {
    10
}

fn default_api_base() -> String {
    "https://codestral.mistral.ai/v1".to_string()
}

fn default_model() -> String {
    "codestral-latest".to_string()
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_temperature() -> f32 {
    0.7
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_image() -> String {
    "agent-sandbox:latest".to_string()
}

fn default_name_prefix() -> String {
    "agent-sandbox".to_string()
}

fn default_network() -> String {
    "agent-sandbox-network".to_string()
}

fn default_ttl_minutes() -> u64 {
    30
}

fn default_ready_timeout() -> u64 {
    60
}

fn default_ready_poll_interval() -> u64 {
    1000
}

fn default_cleanup_interval() -> u64 {
    60
}

fn default_stop_timeout() -> u64 {
    10
}

fn default_cpu_cores() -> f32 {
    1.5
}

fn default_memory_mb() -> u64 {
    2048
}

fn default_shm_size_mb() -> u64 {
    2048
}

fn default_cap_add() -> Vec<String> {
    vec!["SYS_ADMIN".to_string()]
}

fn default_ports() -> Vec<u16> {
    vec![8080, 5900, 6080]
}

fn default_max_results() -> u8 {
    5
}

impl SandboxConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_minutes * 60)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        // Expand environment variables like ${LLM_API_KEY}
        let expanded = shellexpand::env(&content)?;
        let config: Config = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would make the agent or the sandboxes unusable
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.agent.max_iterations == 0 {
            anyhow::bail!("agent.max_iterations must be at least 1");
        }
        if self.sandbox.ready_poll_interval_ms == 0 {
            anyhow::bail!("sandbox.ready_poll_interval_ms must be greater than 0");
        }
        if self.sandbox.cleanup_interval_secs == 0 {
            anyhow::bail!("sandbox.cleanup_interval_secs must be greater than 0");
        }
        if !self.sandbox.cpu_cores.is_finite() || self.sandbox.cpu_cores <= 0.0 {
            anyhow::bail!(
                "sandbox.cpu_cores must be a finite positive number, got {}",
                self.sandbox.cpu_cores
            );
        }
        if let Some(ref search) = self.tools.search {
            match search.provider.as_str() {
                "tavily" | "bing" => {}
                other => anyhow::bail!(
                    "Unsupported search provider: '{other}'. Supported: 'tavily', 'bing'."
                ),
            }
        }
        Ok(())
    }
}
