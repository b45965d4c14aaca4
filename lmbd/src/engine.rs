//! Container engine collaborator.
//!
//! Handlers only talk to the engine through [`EngineClient`]. The production
//! implementation, [`DockerCli`], shells out to the docker CLI pointed at a
//! single daemon endpoint; tests substitute their own implementation.

use crate::ports::{parse_exposed_port, PortBinding, Protocol};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, instrument};

/// Identifier of a built image, as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageReference(pub String);

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerHandle(pub String);

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub container_port: u16,
    pub protocol: Protocol,
    pub host_ip: Option<String>,
    pub host_port: Option<u16>,
}

/// Container state as reported by the engine after start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    pub id: String,
    pub name: String,
    pub image: Option<String>,
    pub status: String,
    pub running: bool,
    pub started_at: Option<String>,
    pub ports: Vec<PortMapping>,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to invoke engine client '{binary}': {source}")]
    Spawn {
        binary: String,
        source: std::io::Error,
    },
    #[error("engine {operation} failed{}: {message}", exit_suffix(.exit_code))]
    Daemon {
        operation: &'static str,
        exit_code: Option<i32>,
        message: String,
    },
    #[error("unexpected engine {operation} output: {message}")]
    Protocol {
        operation: &'static str,
        message: String,
    },
}

fn exit_suffix(code: &Option<i32>) -> String {
    code.map(|c| format!(" (exit {})", c)).unwrap_or_default()
}

#[async_trait]
pub trait EngineClient: Send + Sync {
    /// Build an image from `context_dir` using the descriptor at `descriptor`.
    async fn build_image(
        &self,
        context_dir: &Path,
        descriptor: &Path,
        tags: &[String],
    ) -> Result<ImageReference, EngineError>;

    async fn create_and_start_container(
        &self,
        image: &str,
        bindings: &[PortBinding],
    ) -> Result<ContainerHandle, EngineError>;

    async fn inspect(&self, container: &ContainerHandle) -> Result<ContainerStatus, EngineError>;
}

/// Drives a daemon through the docker CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    host: Option<String>,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>, host: Option<String>) -> Self {
        Self {
            binary: binary.into(),
            host: host.filter(|h| !h.trim().is_empty()),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        if let Some(host) = &self.host {
            command.arg("-H").arg(host);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }

    async fn run(&self, operation: &'static str, mut command: Command) -> Result<String, EngineError> {
        let start = Instant::now();
        let output = command.output().await.map_err(|source| EngineError::Spawn {
            binary: self.binary.clone(),
            source,
        })?;
        debug!(
            operation,
            duration_ms = start.elapsed().as_millis() as u64,
            "engine call finished with {}",
            output.status
        );

        if !output.status.success() {
            return Err(EngineError::Daemon {
                operation,
                exit_code: output.status.code(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl EngineClient for DockerCli {
    #[instrument(skip(self, descriptor), fields(context = %context_dir.display()))]
    async fn build_image(
        &self,
        context_dir: &Path,
        descriptor: &Path,
        tags: &[String],
    ) -> Result<ImageReference, EngineError> {
        let mut command = self.command();
        command.arg("build").arg("--quiet").arg("--file").arg(descriptor);
        for tag in tags {
            command.arg("--tag").arg(tag);
        }
        command.arg(context_dir);

        let stdout = self.run("build", command).await?;
        let image = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| EngineError::Protocol {
                operation: "build",
                message: "no image id reported".to_string(),
            })?;

        info!("built image {}", image);
        Ok(ImageReference(image.to_string()))
    }

    #[instrument(skip(self))]
    async fn create_and_start_container(
        &self,
        image: &str,
        bindings: &[PortBinding],
    ) -> Result<ContainerHandle, EngineError> {
        let mut command = self.command();
        command.arg("create");
        for binding in bindings {
            command.arg("--publish").arg(binding.to_string());
        }
        command.arg(image);

        let id = self.run("create", command).await?;
        if id.is_empty() {
            return Err(EngineError::Protocol {
                operation: "create",
                message: "no container id reported".to_string(),
            });
        }
        let container = ContainerHandle(id);

        let mut command = self.command();
        command.arg("start").arg(&container.0);
        self.run("start", command).await?;

        info!("started container {} from {}", container, image);
        Ok(container)
    }

    #[instrument(skip(self))]
    async fn inspect(&self, container: &ContainerHandle) -> Result<ContainerStatus, EngineError> {
        let mut command = self.command();
        command
            .arg("inspect")
            .arg("--type")
            .arg("container")
            .arg(&container.0);

        let stdout = self.run("inspect", command).await?;
        ContainerStatus::from_inspect_json(&stdout)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawInspect {
    id: String,
    #[serde(default)]
    name: String,
    config: Option<RawConfig>,
    state: RawState,
    network_settings: Option<RawNetworkSettings>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawConfig {
    image: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawState {
    status: String,
    #[serde(default)]
    running: bool,
    started_at: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawNetworkSettings {
    #[serde(default)]
    ports: Option<BTreeMap<String, Option<Vec<RawHostBinding>>>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawHostBinding {
    #[serde(default)]
    host_ip: String,
    #[serde(default)]
    host_port: String,
}

impl ContainerStatus {
    /// Build a status record from `docker inspect` output (a one-element JSON array).
    pub fn from_inspect_json(raw: &str) -> Result<Self, EngineError> {
        let protocol_error = |message: String| EngineError::Protocol {
            operation: "inspect",
            message,
        };

        let mut records: Vec<RawInspect> =
            serde_json::from_str(raw).map_err(|e| protocol_error(e.to_string()))?;
        if records.is_empty() {
            return Err(protocol_error("empty inspect result".to_string()));
        }
        let record = records.swap_remove(0);

        let mut ports = Vec::new();
        let published = record
            .network_settings
            .and_then(|settings| settings.ports)
            .unwrap_or_default();
        for (key, host_bindings) in published {
            let Some((container_port, protocol)) = parse_exposed_port(&key) else {
                continue;
            };
            let host_bindings = host_bindings.unwrap_or_default();
            if host_bindings.is_empty() {
                ports.push(PortMapping {
                    container_port,
                    protocol,
                    host_ip: None,
                    host_port: None,
                });
            }
            for binding in host_bindings {
                ports.push(PortMapping {
                    container_port,
                    protocol,
                    host_ip: Some(binding.host_ip).filter(|ip| !ip.is_empty()),
                    host_port: binding.host_port.parse().ok(),
                });
            }
        }

        Ok(ContainerStatus {
            id: record.id,
            name: record.name.trim_start_matches('/').to_string(),
            image: record.config.and_then(|c| c.image),
            status: record.state.status,
            running: record.state.running,
            started_at: record.state.started_at,
            ports,
        })
    }
}
