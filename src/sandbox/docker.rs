//! Docker implementation of [`ContainerRuntime`] over the Engine API.
//!
//! Translates the runtime-agnostic [`ContainerSpec`] into a bollard
//! container config: CPU quota/period, memory and shared-memory caps,
//! added capabilities, a dedicated network, and control ports published
//! on host ports chosen by the daemon.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
        StartContainerOptions, StopContainerOptions,
    },
    exec::{CreateExecOptions, StartExecResults},
    image::CreateImageOptions,
    models::{HostConfig, PortBinding},
    Docker,
};
use futures::StreamExt;
use tracing::{debug, info};

use super::runtime::{
    ContainerRuntime, ContainerSpec, ExecOptions, ExecOutput, LogOptions, RuntimeError,
    RuntimeInfo,
};

/// CFS scheduler period; the quota is derived from `cpu_cores` against it.
const CPU_PERIOD: i64 = 100_000;

/// Label applied to every container this process creates.
const MANAGED_LABEL: &str = "sandbox-agent.managed";

pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    /// Connects using the local defaults (`DOCKER_HOST` or the unix socket).
    pub fn connect() -> Result<Self, RuntimeError> {
        let client = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Connection(e.to_string()))?;
        Ok(Self { client })
    }

    /// Fails fast when the daemon is unreachable.
    pub async fn ping(&self) -> Result<(), RuntimeError> {
        self.client
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Connection(e.to_string()))
    }

    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        match self.client.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => return Err(RuntimeError::Image(e.to_string())),
        }

        info!("Pulling image: {image}");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.client.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            let progress = progress
                .map_err(|e| RuntimeError::Image(format!("Failed to pull {image}: {e}")))?;
            if let Some(error) = progress.error {
                return Err(RuntimeError::Image(format!("Failed to pull {image}: {error}")));
            }
        }
        Ok(())
    }
}

/// Converts the runtime-agnostic spec into a bollard container config.
fn to_bollard_config(spec: &ContainerSpec) -> Config<String> {
    let mut exposed_ports = HashMap::new();
    let mut port_bindings = HashMap::new();
    for port in &spec.ports {
        let key = format!("{port}/tcp");
        exposed_ports.insert(key.clone(), HashMap::new());
        // No host port: the daemon assigns an ephemeral one
        port_bindings.insert(
            key,
            Some(vec![PortBinding {
                host_ip: None,
                host_port: None,
            }]),
        );
    }

    let mut env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
    env.sort();

    let host_config = HostConfig {
        memory: Some((spec.limits.memory_mb * 1024 * 1024) as i64),
        shm_size: Some((spec.limits.shm_size_mb * 1024 * 1024) as i64),
        cpu_period: Some(CPU_PERIOD),
        cpu_quota: Some((spec.limits.cpu_cores as f64 * CPU_PERIOD as f64) as i64),
        cap_add: if spec.limits.cap_add.is_empty() {
            None
        } else {
            Some(spec.limits.cap_add.clone())
        },
        network_mode: Some(spec.network.clone()),
        port_bindings: if port_bindings.is_empty() {
            None
        } else {
            Some(port_bindings)
        },
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        env: Some(env),
        labels: Some(HashMap::from([(MANAGED_LABEL.to_string(), "true".to_string())])),
        exposed_ports: Some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    }
}

fn container_err(e: bollard::errors::Error) -> RuntimeError {
    RuntimeError::Container(e.to_string())
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        self.ensure_image(&spec.image).await?;

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let response = self
            .client
            .create_container(Some(options), to_bollard_config(spec))
            .await
            .map_err(container_err)?;

        debug!("Created container {} ({})", spec.name, response.id);
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.client
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(container_err)
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let options = StopContainerOptions {
            t: timeout.as_secs() as i64,
        };
        self.client
            .stop_container(id, Some(options))
            .await
            .map_err(container_err)
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force,
            v: true,
            ..Default::default()
        };
        self.client
            .remove_container(id, Some(options))
            .await
            .map_err(container_err)
    }

    async fn exec(
        &self,
        id: &str,
        command: &[String],
        options: &ExecOptions,
    ) -> Result<ExecOutput, RuntimeError> {
        let env: Option<Vec<String>> = if options.env.is_empty() {
            None
        } else {
            Some(options.env.iter().map(|(k, v)| format!("{k}={v}")).collect())
        };

        let exec = self
            .client
            .create_exec(
                id,
                CreateExecOptions {
                    cmd: Some(command.to_vec()),
                    env,
                    working_dir: options.working_dir.clone(),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(container_err)?;

        let collect = async {
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            match self.client.start_exec(&exec.id, None).await.map_err(container_err)? {
                StartExecResults::Attached { mut output, .. } => {
                    while let Some(msg) = output.next().await {
                        match msg.map_err(container_err)? {
                            LogOutput::StdOut { message } | LogOutput::Console { message } => {
                                stdout.extend_from_slice(&message)
                            }
                            LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
                            LogOutput::StdIn { .. } => {}
                        }
                    }
                }
                StartExecResults::Detached => {
                    return Err(RuntimeError::Container(
                        "Exec was detached unexpectedly".to_string(),
                    ))
                }
            }
            Ok::<_, RuntimeError>((stdout, stderr))
        };

        let (stdout, stderr) = match options.timeout {
            Some(limit) => tokio::time::timeout(limit, collect)
                .await
                .map_err(|_| RuntimeError::Timeout(limit))??,
            None => collect.await?,
        };

        let inspect = self.client.inspect_exec(&exec.id).await.map_err(container_err)?;

        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or(-1),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    async fn logs(&self, id: &str, options: &LogOptions) -> Result<String, RuntimeError> {
        let logs_options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            timestamps: options.timestamps,
            tail: options
                .tail
                .map(|n| n.to_string())
                .unwrap_or_else(|| "all".to_string()),
            ..Default::default()
        };

        let mut stream = self.client.logs(id, Some(logs_options));
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk.map_err(container_err)? {
                LogOutput::StdOut { message }
                | LogOutput::StdErr { message }
                | LogOutput::Console { message } => {
                    text.push_str(&String::from_utf8_lossy(&message));
                }
                LogOutput::StdIn { .. } => {}
            }
        }
        Ok(text)
    }

    async fn inspect(&self, id: &str) -> Result<RuntimeInfo, RuntimeError> {
        let inspect = self
            .client
            .inspect_container(id, None)
            .await
            .map_err(container_err)?;

        let status = inspect
            .state
            .as_ref()
            .and_then(|s| s.status.as_ref())
            .map(|s| {
                let s: &str = s.as_ref();
                s.to_string()
            })
            .unwrap_or_else(|| "unknown".to_string());

        let mut ports = HashMap::new();
        if let Some(port_map) = inspect.network_settings.as_ref().and_then(|n| n.ports.as_ref()) {
            for (container_port, bindings) in port_map {
                let host_port = bindings
                    .as_ref()
                    .and_then(|b| b.first())
                    .and_then(|b| b.host_port.as_ref())
                    .and_then(|p| p.parse::<u16>().ok());
                // Keys look like "8080/tcp"
                let container_port = container_port
                    .split('/')
                    .next()
                    .and_then(|p| p.parse::<u16>().ok());
                if let (Some(container_port), Some(host_port)) = (container_port, host_port) {
                    ports.insert(container_port, host_port);
                }
            }
        }

        let created_at = inspect
            .created
            .as_ref()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc));

        Ok(RuntimeInfo {
            id: id.to_string(),
            name: inspect
                .name
                .unwrap_or_else(|| id.to_string())
                .trim_start_matches('/')
                .to_string(),
            status,
            ports,
            image: inspect.config.and_then(|c| c.image),
            created_at,
        })
    }
}
