//! Per-session isolated execution environments.
//!
//! - `runtime`: the container engine capability the manager consumes
//! - `docker`: Docker Engine implementation of that capability
//! - `store`: per-session locked record table
//! - `manager`: create / destroy / expire / exec lifecycle
//! - `workspace`: path confinement for file operations inside a sandbox

pub mod docker;
pub mod manager;
pub mod runtime;
pub mod store;
pub mod workspace;

use std::time::Duration;

use thiserror::Error;

pub use docker::DockerRuntime;
pub use manager::{SandboxManager, SandboxSettings};
pub use runtime::{ContainerRuntime, ExecOptions, ExecOutput, RuntimeError};

/// Failures of sandbox lifecycle operations, surfaced to the immediate
/// caller and never retried.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Failed to create sandbox for session {session_id}: {reason}")]
    CreationFailed { session_id: String, reason: String },

    #[error("Sandbox for session {session_id} did not become ready within {waited:?}")]
    Timeout { session_id: String, waited: Duration },

    #[error("Sandbox for session {0} not found or expired")]
    NotFound(String),

    #[error("Failed to destroy sandbox for session {session_id}: {reason}")]
    DestructionFailed { session_id: String, reason: String },

    #[error("Sandbox for session {0} already exists")]
    AlreadyExists(String),

    #[error("Runtime error in sandbox for session {session_id}: {source}")]
    Runtime {
        session_id: String,
        #[source]
        source: RuntimeError,
    },
}
