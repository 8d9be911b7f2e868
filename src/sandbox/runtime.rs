//! `ContainerRuntime` trait: what the lifecycle manager needs from a
//! container engine.
//!
//! The manager only sees opaque container ids, a [`ContainerSpec`], and
//! the operations below.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Container error: {0}")]
    Container(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Command timed out after {0:?}")]
    Timeout(Duration),
}

/// Fixed resource profile and identity of a container to create.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image: String,
    pub name: String,
    pub env: HashMap<String, String>,
    pub network: String,
    pub limits: ResourceLimits,
    /// Container ports published on runtime-assigned host ports
    pub ports: Vec<u16>,
}

#[derive(Debug, Clone)]
pub struct ResourceLimits {
    pub cpu_cores: f32,
    pub memory_mb: u64,
    pub shm_size_mb: u64,
    pub cap_add: Vec<String>,
}

/// Options for a command executed inside a container.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub working_dir: Option<String>,
    pub timeout: Option<Duration>,
    pub env: HashMap<String, String>,
}

impl ExecOptions {
    pub fn in_dir(dir: impl Into<String>) -> Self {
        Self {
            working_dir: Some(dir.into()),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Number of trailing lines; `None` returns everything
    pub tail: Option<usize>,
    pub timestamps: bool,
}

/// Read-only snapshot of what the runtime reports about a container.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeInfo {
    pub id: String,
    pub name: String,
    pub status: String,
    /// container port -> host port
    pub ports: HashMap<u16, u16>,
    pub image: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl RuntimeInfo {
    /// Snapshot used when the runtime cannot be inspected.
    pub fn unknown(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            status: "unknown".to_string(),
            ports: HashMap::new(),
            image: None,
            created_at: None,
        }
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Creates (but does not start) a container and returns its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError>;

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError>;

    /// Runs `command` (argv form, no shell) inside a running container.
    async fn exec(
        &self,
        id: &str,
        command: &[String],
        options: &ExecOptions,
    ) -> Result<ExecOutput, RuntimeError>;

    async fn logs(&self, id: &str, options: &LogOptions) -> Result<String, RuntimeError>;

    async fn inspect(&self, id: &str) -> Result<RuntimeInfo, RuntimeError>;
}
