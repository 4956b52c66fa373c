//! The container runtime daemon, behind a trait.
//!
//! [`ContainerRuntime`] is the narrow command surface the orchestrator needs:
//! image listing and pull, container create/start/stop/remove, and a
//! long-lived event subscription exposed as an unframed byte stream.
//! [`DockerRuntime`] implements it over bollard.

use std::collections::HashMap;
use std::io;
use std::pin::Pin;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::{CreateImageOptions, ListImagesOptions};
use bollard::models::{HostConfig, PortBinding};
use bollard::system::EventsOptions;
use bytes::Bytes;
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::RwLock;
use tokio_util::io::StreamReader;

use crate::docker::error::RuntimeError;

/// Raw event stream handed to the decoder.
pub type EventReader = Pin<Box<dyn AsyncRead + Send>>;

/// Everything needed to create the database container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Image reference including tag.
    pub image: String,
    /// Port inside the container.
    pub container_port: u16,
    /// Port bound on the host.
    pub host_port: u16,
    /// Environment as `KEY=value` entries, passed through unmodified.
    pub env: Vec<String>,
    /// Allocate a TTY.
    pub tty: bool,
}

impl ContainerSpec {
    /// Docker port key for the container port.
    pub fn port_key(&self) -> String {
        format!("{}/tcp", self.container_port)
    }
}

/// Commands the orchestrator issues against a container runtime daemon.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Open the client connection.
    async fn open(&self) -> Result<(), RuntimeError>;

    /// Release the client connection. Safe to call more than once.
    async fn close(&self);

    /// Whether a local image matches `image`.
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;

    /// Pull `image` at `tag`.
    async fn pull_image(&self, image: &str, tag: &str) -> Result<(), RuntimeError>;

    /// Create the container, returning its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    /// Start a container. `Ok(false)` means the daemon did not act on it.
    async fn start_container(&self, name: &str) -> Result<bool, RuntimeError>;

    /// Stop a container. `Ok(false)` means the daemon did not act on it.
    async fn stop_container(&self, name: &str) -> Result<bool, RuntimeError>;

    /// Remove a container.
    async fn remove_container(&self, name: &str, force: bool) -> Result<(), RuntimeError>;

    /// Subscribe to daemon events as an unframed byte stream.
    async fn events(&self) -> Result<EventReader, RuntimeError>;
}

/// Connect to the local Docker daemon and check that it responds.
///
/// Uses bollard's platform defaults: the Unix socket on Linux and macOS,
/// the `docker_engine` named pipe on Windows, `DOCKER_HOST` when set.
pub async fn connect_docker() -> Result<Docker, RuntimeError> {
    let docker =
        Docker::connect_with_local_defaults().map_err(|e| RuntimeError::DockerNotAvailable {
            reason: e.to_string(),
        })?;

    docker
        .ping()
        .await
        .map_err(|e| RuntimeError::DockerNotAvailable {
            reason: e.to_string(),
        })?;

    Ok(docker)
}

/// [`ContainerRuntime`] backed by the Docker Engine API.
#[derive(Default)]
pub struct DockerRuntime {
    docker: RwLock<Option<Docker>>,
}

impl DockerRuntime {
    /// Create an unopened runtime.
    pub fn new() -> Self {
        Self::default()
    }

    async fn client(&self) -> Result<Docker, RuntimeError> {
        self.docker
            .read()
            .await
            .clone()
            .ok_or(RuntimeError::NotConnected)
    }
}

/// Docker answers 304 when a container is already in the requested state.
fn accepted(
    result: Result<(), BollardError>,
    command: &'static str,
    name: &str,
) -> Result<bool, RuntimeError> {
    match result {
        Ok(()) => Ok(true),
        Err(BollardError::DockerResponseServerError {
            status_code: 304, ..
        }) => Ok(false),
        Err(e) => Err(RuntimeError::CommandRejected {
            command,
            target: name.to_string(),
            reason: e.to_string(),
        }),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn open(&self) -> Result<(), RuntimeError> {
        let mut slot = self.docker.write().await;
        if slot.is_none() {
            tracing::debug!("Creating Docker client");
            *slot = Some(connect_docker().await?);
        }
        Ok(())
    }

    async fn close(&self) {
        if self.docker.write().await.take().is_some() {
            tracing::debug!("Docker client closed");
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        let docker = self.client().await?;

        let mut filters = HashMap::new();
        filters.insert("reference".to_string(), vec![image.to_string()]);
        let options = ListImagesOptions {
            filters,
            ..Default::default()
        };

        let images = docker
            .list_images(Some(options))
            .await
            .map_err(|e| RuntimeError::CommandRejected {
                command: "list images",
                target: image.to_string(),
                reason: e.to_string(),
            })?;

        Ok(!images.is_empty())
    }

    async fn pull_image(&self, image: &str, tag: &str) -> Result<(), RuntimeError> {
        let docker = self.client().await?;

        let options = CreateImageOptions {
            from_image: image.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };

        let mut stream = docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    tracing::trace!(
                        id = info.id.as_deref().unwrap_or_default(),
                        status = info.status.as_deref().unwrap_or_default(),
                        progress = info.progress.as_deref().unwrap_or_default(),
                        "Pull progress"
                    );
                }
                Err(e) => {
                    return Err(RuntimeError::ImagePullFailed {
                        image: format!("{image}:{tag}"),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let docker = self.client().await?;
        let port_key = spec.port_key();

        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            port_key.clone(),
            Some(vec![PortBinding {
                host_ip: None,
                host_port: Some(spec.host_port.to_string()),
            }]),
        );

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(port_key, HashMap::new());

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            auto_remove: Some(false),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            tty: Some(spec.tty),
            env: if spec.env.is_empty() {
                None
            } else {
                Some(spec.env.clone())
            },
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };

        let response = docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| RuntimeError::CommandRejected {
                command: "create",
                target: spec.name.clone(),
                reason: e.to_string(),
            })?;

        for warning in &response.warnings {
            tracing::warn!(container = %spec.name, "Docker: {}", warning);
        }

        Ok(response.id)
    }

    async fn start_container(&self, name: &str) -> Result<bool, RuntimeError> {
        let docker = self.client().await?;
        let result = docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await;
        accepted(result, "start", name)
    }

    async fn stop_container(&self, name: &str) -> Result<bool, RuntimeError> {
        let docker = self.client().await?;
        let result = docker
            .stop_container(name, None::<StopContainerOptions>)
            .await;
        accepted(result, "stop", name)
    }

    async fn remove_container(&self, name: &str, force: bool) -> Result<(), RuntimeError> {
        let docker = self.client().await?;
        docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| RuntimeError::CommandRejected {
                command: "remove",
                target: name.to_string(),
                reason: e.to_string(),
            })
    }

    async fn events(&self) -> Result<EventReader, RuntimeError> {
        let docker = self.client().await?;

        // bollard parses the daemon's event stream; re-encode each message so
        // the decoder consumes the same unframed JSON the daemon writes.
        let bytes = docker
            .events(None::<EventsOptions<String>>)
            .map(|message| {
                let message = message.map_err(io::Error::other)?;
                serde_json::to_vec(&message)
                    .map(Bytes::from)
                    .map_err(io::Error::other)
            })
            .boxed();

        Ok(Box::pin(StreamReader::new(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            name: "sqlserver-test".to_string(),
            image: "mcr.microsoft.com/mssql/server:latest".to_string(),
            container_port: 1433,
            host_port: 9123,
            env: vec!["ACCEPT_EULA=Y".to_string()],
            tty: true,
        }
    }

    #[test]
    fn test_port_key() {
        assert_eq!(spec().port_key(), "1433/tcp");
    }

    #[test]
    fn test_not_modified_maps_to_not_accepted() {
        let not_modified = Err(BollardError::DockerResponseServerError {
            status_code: 304,
            message: String::new(),
        });
        assert!(!accepted(not_modified, "start", "c").unwrap());
        assert!(accepted(Ok(()), "start", "c").unwrap());

        let conflict = Err(BollardError::DockerResponseServerError {
            status_code: 409,
            message: "conflict".to_string(),
        });
        assert!(matches!(
            accepted(conflict, "stop", "c"),
            Err(RuntimeError::CommandRejected { command: "stop", .. })
        ));
    }

    #[tokio::test]
    async fn test_commands_require_open_client() {
        let runtime = DockerRuntime::new();
        assert!(matches!(
            runtime.start_container("c").await,
            Err(RuntimeError::NotConnected)
        ));
        assert!(matches!(
            runtime.create_container(&spec()).await,
            Err(RuntimeError::NotConnected)
        ));
        runtime.close().await;
    }
}
