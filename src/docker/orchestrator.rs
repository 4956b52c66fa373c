//! Database container lifecycle orchestration.

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::docker::broadcaster::{StatusBroadcaster, WaitOptions};
use crate::docker::config::ContainerConfig;
use crate::docker::connection::ConnectionInfo;
use crate::docker::error::{OrchestratorError, Result, RuntimeError};
use crate::docker::event::{ContainerStatus, NetworkStatus};
use crate::docker::monitor::spawn_event_monitor;
use crate::docker::runtime::{ContainerRuntime, DockerRuntime};

/// Lifecycle state of the orchestrated container.
///
/// Startup walks `Uninitialized` through `ExecutionReady`; teardown walks
/// `StopRequested` through `Terminated`, which is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing started yet.
    Uninitialized,
    /// Runtime client connected and monitoring.
    ClientOpen,
    /// Image present locally.
    ImageReady,
    /// Container created.
    ContainerCreated,
    /// Start command accepted.
    ContainerStarted,
    /// Ready status observed; database handed out.
    ExecutionReady,
    /// Startup failed; `stop()` still cleans up.
    Failed,
    /// Teardown in progress.
    StopRequested,
    /// Stopped status observed.
    ContainerStopped,
    /// Destroyed status observed.
    ContainerRemoved,
    /// Torn down. No way back.
    Terminated,
}

/// One provisioned container and the monitoring bound to it.
struct Session {
    container_name: String,
    host_port: Option<u16>,
    connection: Option<ConnectionInfo>,
    cancel: CancellationToken,
    monitor: Option<JoinHandle<()>>,
}

/// Provisions, starts, monitors and tears down one database container.
///
/// One session at a time: `start()` while a session exists is rejected, and
/// after `stop()` the orchestrator is terminated for good.
pub struct ContainerOrchestrator {
    config: ContainerConfig,
    runtime: Arc<dyn ContainerRuntime>,
    containers: Arc<StatusBroadcaster<ContainerStatus>>,
    networks: Arc<StatusBroadcaster<NetworkStatus>>,
    session: RwLock<Option<Session>>,
    state: RwLock<SessionState>,
}

impl ContainerOrchestrator {
    /// Create an orchestrator over the given runtime.
    pub fn new(config: ContainerConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            config,
            runtime,
            containers: Arc::new(StatusBroadcaster::new()),
            networks: Arc::new(StatusBroadcaster::new()),
            session: RwLock::new(None),
            state: RwLock::new(SessionState::Uninitialized),
        }
    }

    /// Create an orchestrator talking to the local Docker daemon.
    pub fn docker(config: ContainerConfig) -> Self {
        Self::new(config, Arc::new(DockerRuntime::new()))
    }

    /// Get the configuration.
    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Get the current state.
    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    async fn set_state(&self, state: SessionState) {
        let mut current = self.state.write().await;
        tracing::trace!(from = ?*current, to = ?state, "Session state change");
        *current = state;
    }

    /// Last observed container status.
    pub fn container_status(&self) -> ContainerStatus {
        self.containers.current()
    }

    /// Last observed network status.
    pub fn network_status(&self) -> NetworkStatus {
        self.networks.current()
    }

    /// Container status broadcaster, for callers that want to subscribe.
    pub fn container_events(&self) -> &Arc<StatusBroadcaster<ContainerStatus>> {
        &self.containers
    }

    /// Network status broadcaster, for callers that want to subscribe.
    pub fn network_events(&self) -> &Arc<StatusBroadcaster<NetworkStatus>> {
        &self.networks
    }

    /// Name of the managed container, if a session exists.
    pub async fn container_name(&self) -> Option<String> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.container_name.clone())
    }

    /// Host port bound to the database, once allocated.
    pub async fn host_port(&self) -> Option<u16> {
        self.session.read().await.as_ref().and_then(|s| s.host_port)
    }

    /// Connection descriptor, once the container is created.
    pub async fn connection_info(&self) -> Option<ConnectionInfo> {
        self.session
            .read()
            .await
            .as_ref()
            .and_then(|s| s.connection.clone())
    }

    /// Provision and start the database container.
    ///
    /// Returns once the configured ready status has been observed and the
    /// settle delay has elapsed. Any failure is fatal to this start: the
    /// state becomes `Failed` and the session stays in place so `stop()` can
    /// tear down whatever was created.
    pub async fn start(&self) -> Result<ConnectionInfo> {
        {
            let state = self.state.read().await;
            let session = self.session.read().await;
            match (*state, session.as_ref()) {
                (SessionState::Terminated, _) => return Err(OrchestratorError::Terminated),
                (SessionState::Failed, Some(s)) => {
                    return Err(OrchestratorError::PreviousStartFailed {
                        name: s.container_name.clone(),
                    });
                }
                (_, Some(s)) => {
                    return Err(OrchestratorError::AlreadyStarted {
                        name: s.container_name.clone(),
                    });
                }
                (_, None) => {}
            }
        }

        match self.run_startup().await {
            Ok(connection) => Ok(connection),
            Err(e) => {
                tracing::error!(error = %e, "Database container startup failed");
                self.set_state(SessionState::Failed).await;
                Err(e)
            }
        }
    }

    async fn run_startup(&self) -> Result<ConnectionInfo> {
        let container_name = self.config.container_name();
        let cancel = CancellationToken::new();

        // Claim the session slot before any await that could let a second
        // start() through.
        {
            let mut slot = self.session.write().await;
            if let Some(existing) = slot.as_ref() {
                return Err(OrchestratorError::AlreadyStarted {
                    name: existing.container_name.clone(),
                });
            }
            *slot = Some(Session {
                container_name: container_name.clone(),
                host_port: None,
                connection: None,
                cancel: cancel.clone(),
                monitor: None,
            });
        }

        self.runtime.open().await?;
        self.set_state(SessionState::ClientOpen).await;

        let reader = self.runtime.events().await?;
        let monitor = spawn_event_monitor(
            reader,
            container_name.clone(),
            cancel.clone(),
            Arc::clone(&self.containers),
            Arc::clone(&self.networks),
        );
        if let Some(session) = self.session.write().await.as_mut() {
            session.monitor = Some(monitor);
        }

        self.ensure_image().await?;
        self.set_state(SessionState::ImageReady).await;

        let host_port = self.config.pick_host_port()?;
        let spec = self.config.container_spec(&container_name, host_port);
        let container_id = self.runtime.create_container(&spec).await?;
        let connection = self.config.connection_info(host_port);
        if let Some(session) = self.session.write().await.as_mut() {
            session.host_port = Some(host_port);
            session.connection = Some(connection.clone());
        }
        self.set_state(SessionState::ContainerCreated).await;

        tracing::info!(
            container = %container_name,
            id = %container_id,
            port = host_port,
            "Created database container"
        );
        tracing::info!("Connection string: {}", connection);

        if !self.runtime.start_container(&container_name).await? {
            return Err(RuntimeError::CommandRejected {
                command: "start",
                target: container_name,
                reason: "daemon did not start the container".to_string(),
            }
            .into());
        }
        self.set_state(SessionState::ContainerStarted).await;

        let options = WaitOptions::unbounded()
            .with_optional_timeout(self.config.startup_timeout)
            .with_cancel(cancel.child_token());
        let status = self
            .containers
            .wait_for(self.config.ready_status, options)
            .await?;
        self.set_state(SessionState::ExecutionReady).await;

        tracing::info!(
            container = %container_name,
            status = %status,
            settle = ?self.config.settle_delay,
            "Database container executing, settling"
        );
        tokio::time::sleep(self.config.settle_delay).await;

        Ok(connection)
    }

    /// Make sure the image is present locally, pulling it if not.
    async fn ensure_image(&self) -> Result<()> {
        if self.runtime.image_exists(&self.config.image_reference()).await? {
            tracing::debug!(image = %self.config.image_reference(), "Image exists locally");
            return Ok(());
        }

        tracing::info!(image = %self.config.image_reference(), "Pulling image");
        self.runtime
            .pull_image(&self.config.image, &self.config.tag)
            .await?;
        tracing::info!(image = %self.config.image_reference(), "Pulled image");
        Ok(())
    }

    /// Wait until the current or a future container status intersects `mask`.
    ///
    /// Bounded by `config.wait_timeout` and cancelled when the session's
    /// monitoring is cancelled. With no wait timeout configured this can
    /// block forever if the daemon never reports a matching status.
    pub async fn wait_until_status(&self, mask: ContainerStatus) -> Result<ContainerStatus> {
        let mut options = WaitOptions::unbounded().with_optional_timeout(self.config.wait_timeout);
        if let Some(session) = self.session.read().await.as_ref() {
            options = options.with_cancel(session.cancel.child_token());
        }
        self.wait_until_status_with(mask, options).await
    }

    /// Wait for `mask` with explicit bounds.
    pub async fn wait_until_status_with(
        &self,
        mask: ContainerStatus,
        options: WaitOptions,
    ) -> Result<ContainerStatus> {
        Ok(self.containers.wait_for(mask, options).await?)
    }

    /// Issue a single start command, without waiting for the status.
    pub async fn start_container(&self) -> Result<bool> {
        let name = self.require_container_name().await?;
        let accepted = self.runtime.start_container(&name).await?;
        tracing::info!(container = %name, accepted, "Start container");
        Ok(accepted)
    }

    /// Issue a single stop command, without waiting for the status.
    pub async fn stop_container(&self) -> Result<bool> {
        let name = self.require_container_name().await?;
        let accepted = self.runtime.stop_container(&name).await?;
        tracing::info!(container = %name, accepted, "Stop container");
        Ok(accepted)
    }

    async fn require_container_name(&self) -> Result<String> {
        if self.state().await == SessionState::Terminated {
            return Err(OrchestratorError::Terminated);
        }
        self.container_name()
            .await
            .ok_or(OrchestratorError::NotStarted)
    }

    /// Stop and remove the container, stop monitoring and close the client.
    ///
    /// Best effort: every step is attempted even if an earlier one failed,
    /// and failures are logged rather than returned.
    pub async fn stop(&self) {
        let Some(mut session) = self.session.write().await.take() else {
            tracing::debug!("stop() called without an active session");
            self.set_state(SessionState::Terminated).await;
            return;
        };

        let name = session.container_name.clone();
        tracing::info!(container = %name, "Stopping database container");
        self.set_state(SessionState::StopRequested).await;

        match self.runtime.stop_container(&name).await {
            Ok(true) => {
                if self
                    .teardown_wait(ContainerStatus::STOP, &session.cancel)
                    .await
                {
                    self.set_state(SessionState::ContainerStopped).await;
                }
            }
            Ok(false) => {
                tracing::warn!(container = %name, "Daemon did not stop the container");
            }
            Err(e) => {
                tracing::warn!(container = %name, error = %e, "Failed to stop container");
            }
        }

        match self.runtime.remove_container(&name, true).await {
            Ok(()) => {
                if self
                    .teardown_wait(ContainerStatus::DESTROY, &session.cancel)
                    .await
                {
                    self.set_state(SessionState::ContainerRemoved).await;
                }
            }
            Err(e) => {
                tracing::warn!(container = %name, error = %e, "Failed to remove container");
            }
        }

        tracing::info!("Stopping Docker event monitoring");
        session.cancel.cancel();
        if let Some(mut handle) = session.monitor.take() {
            match tokio::time::timeout(self.config.monitor_join_timeout, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Docker event monitor task failed");
                }
                Err(_) => {
                    tracing::warn!(
                        timeout = ?self.config.monitor_join_timeout,
                        "Docker event monitor did not exit in time, aborting it"
                    );
                    handle.abort();
                }
            }
        }

        self.runtime.close().await;
        self.set_state(SessionState::Terminated).await;
        tracing::info!(container = %name, "Database container torn down");
    }

    async fn teardown_wait(&self, mask: ContainerStatus, cancel: &CancellationToken) -> bool {
        let options = WaitOptions::unbounded()
            .with_optional_timeout(self.config.stop_timeout)
            .with_cancel(cancel.child_token());
        match self.containers.wait_for(mask, options).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Teardown wait did not complete");
                false
            }
        }
    }
}

impl Drop for ContainerOrchestrator {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().as_ref() {
            tracing::warn!(
                container = %session.container_name,
                "ContainerOrchestrator dropped without stop(), container may remain running"
            );
            session.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRuntime;
    use std::time::Duration;

    fn orchestrator() -> (ContainerOrchestrator, Arc<ScriptedRuntime>) {
        let runtime = Arc::new(ScriptedRuntime::new());
        let config = ContainerConfig {
            settle_delay: Duration::ZERO,
            startup_timeout: Some(Duration::from_secs(5)),
            stop_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let runtime_dyn: Arc<dyn ContainerRuntime> = runtime.clone();
        (ContainerOrchestrator::new(config, runtime_dyn), runtime)
    }

    #[tokio::test]
    async fn test_initial_state() {
        let (orchestrator, _) = orchestrator();
        assert_eq!(orchestrator.state().await, SessionState::Uninitialized);
        assert_eq!(orchestrator.container_status(), ContainerStatus::NONE);
        assert!(orchestrator.container_name().await.is_none());
        assert!(orchestrator.connection_info().await.is_none());
    }

    #[tokio::test]
    async fn test_manual_commands_need_a_session() {
        let (orchestrator, _) = orchestrator();
        assert!(matches!(
            orchestrator.start_container().await,
            Err(OrchestratorError::NotStarted)
        ));
        assert!(matches!(
            orchestrator.stop_container().await,
            Err(OrchestratorError::NotStarted)
        ));
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        let (orchestrator, runtime) = orchestrator();

        let connection = orchestrator.start().await.unwrap();
        assert_eq!(orchestrator.state().await, SessionState::ExecutionReady);
        assert_eq!(orchestrator.host_port().await, Some(connection.port));
        assert!((9000..10000).contains(&connection.port));

        orchestrator.stop().await;
        assert_eq!(orchestrator.state().await, SessionState::Terminated);
        assert!(!runtime.is_open());
        assert!(orchestrator.container_name().await.is_none());
    }

    #[tokio::test]
    async fn test_stop_without_start_terminates() {
        let (orchestrator, runtime) = orchestrator();
        orchestrator.stop().await;
        assert_eq!(orchestrator.state().await, SessionState::Terminated);
        assert!(runtime.calls().is_empty());
        assert!(matches!(
            orchestrator.start().await,
            Err(OrchestratorError::Terminated)
        ));
    }
}
