//! Test doubles for the container runtime.
//!
//! Provides:
//! - [`ScriptedRuntime`]: an in-memory [`ContainerRuntime`] that records
//!   every command and answers each one with the lifecycle events a Docker
//!   daemon would emit, written as raw JSON into the event stream
//! - [`RuntimeCall`]: the recorded command log
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sqldock::docker::{ContainerConfig, ContainerOrchestrator};
//! use sqldock::testing::ScriptedRuntime;
//!
//! # async fn example() {
//! let runtime = Arc::new(ScriptedRuntime::new());
//! let orchestrator = ContainerOrchestrator::new(ContainerConfig::default(), runtime.clone());
//! let connection = orchestrator.start().await.unwrap();
//! orchestrator.stop().await;
//! assert!(!runtime.is_open());
//! # }
//! ```

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, DuplexStream};

use crate::docker::error::RuntimeError;
use crate::docker::runtime::{ContainerRuntime, ContainerSpec, EventReader};

/// Capacity of the in-memory event pipe.
const EVENT_PIPE_CAPACITY: usize = 64 * 1024;

/// One command received by a [`ScriptedRuntime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Open,
    Close,
    Events,
    ImageExists(String),
    PullImage { image: String, tag: String },
    Create(ContainerSpec),
    Start(String),
    Stop(String),
    Remove { name: String, force: bool },
}

/// Which command a failure toggle applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Open,
    Pull,
    Create,
    Start,
    Stop,
    Remove,
}

/// A scripted container runtime for tests.
///
/// Supports:
/// - Call recording via [`calls()`](Self::calls)
/// - Per-command failure toggles via [`fail()`](Self::fail)
/// - Pre-seeded local images via [`with_image()`](Self::with_image)
/// - Silencing lifecycle events via [`set_emit_lifecycle()`](Self::set_emit_lifecycle)
/// - Injecting arbitrary stream bytes via [`emit_raw()`](Self::emit_raw)
pub struct ScriptedRuntime {
    calls: Mutex<Vec<RuntimeCall>>,
    images: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<Command>>,
    emit_lifecycle: AtomicBool,
    open: AtomicBool,
    sink: tokio::sync::Mutex<Option<DuplexStream>>,
}

impl ScriptedRuntime {
    /// Create a runtime with no local images and lifecycle events on.
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            images: Mutex::new(HashSet::new()),
            failing: Mutex::new(HashSet::new()),
            emit_lifecycle: AtomicBool::new(true),
            open: AtomicBool::new(false),
            sink: tokio::sync::Mutex::new(None),
        }
    }

    /// Seed a local image reference (`image:tag`).
    pub fn with_image(self, reference: impl Into<String>) -> Self {
        self.images
            .lock()
            .expect("images lock poisoned")
            .insert(reference.into());
        self
    }

    /// Make `command` fail from now on.
    pub fn fail(&self, command: Command) {
        self.failing
            .lock()
            .expect("failing lock poisoned")
            .insert(command);
    }

    /// Turn the scripted lifecycle events on or off.
    pub fn set_emit_lifecycle(&self, emit: bool) {
        self.emit_lifecycle.store(emit, Ordering::SeqCst);
    }

    /// Every command received so far.
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().expect("calls lock poisoned").clone()
    }

    /// Whether the client is open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Write raw bytes into the event stream.
    pub async fn emit_raw(&self, bytes: &[u8]) {
        if let Some(sink) = self.sink.lock().await.as_mut() {
            let _ = sink.write_all(bytes).await;
        }
    }

    /// Write one container event with the given action.
    pub async fn emit_container(&self, name: &str, action: &str) {
        let event = serde_json::json!({
            "Type": "container",
            "Action": action,
            "Actor": {
                "ID": format!("id-{name}"),
                "Attributes": { "name": name, "image": "scripted" },
            },
            "scope": "local",
            "time": chrono::Utc::now().timestamp(),
        });
        self.emit_raw(format!("{event}\n").as_bytes()).await;
    }

    /// Write one network event with the given action.
    pub async fn emit_network(&self, action: &str) {
        let event = serde_json::json!({
            "Type": "network",
            "Action": action,
            "Actor": { "ID": "bridge" },
            "scope": "local",
        });
        self.emit_raw(format!("{event}\n").as_bytes()).await;
    }

    /// Close the event stream, as if the daemon hung up.
    pub async fn close_events(&self) {
        self.sink.lock().await.take();
    }

    fn record(&self, call: RuntimeCall) {
        self.calls.lock().expect("calls lock poisoned").push(call);
    }

    fn check(&self, command: Command, target: &str) -> Result<(), RuntimeError> {
        if self
            .failing
            .lock()
            .expect("failing lock poisoned")
            .contains(&command)
        {
            return Err(RuntimeError::CommandRejected {
                command: command.name(),
                target: target.to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        if command != Command::Open && !self.is_open() {
            return Err(RuntimeError::NotConnected);
        }
        Ok(())
    }

    async fn lifecycle(&self, name: &str, actions: &[&str]) {
        if !self.emit_lifecycle.load(Ordering::SeqCst) {
            return;
        }
        for action in actions {
            self.emit_container(name, action).await;
        }
    }
}

impl Command {
    fn name(self) -> &'static str {
        match self {
            Command::Open => "open",
            Command::Pull => "pull",
            Command::Create => "create",
            Command::Start => "start",
            Command::Stop => "stop",
            Command::Remove => "remove",
        }
    }
}

impl Default for ScriptedRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    async fn open(&self) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Open);
        self.check(Command::Open, "docker")?;
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.record(RuntimeCall::Close);
        self.open.store(false, Ordering::SeqCst);
        self.close_events().await;
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        self.record(RuntimeCall::ImageExists(image.to_string()));
        if !self.is_open() {
            return Err(RuntimeError::NotConnected);
        }
        Ok(self
            .images
            .lock()
            .expect("images lock poisoned")
            .contains(image))
    }

    async fn pull_image(&self, image: &str, tag: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::PullImage {
            image: image.to_string(),
            tag: tag.to_string(),
        });
        let reference = format!("{image}:{tag}");
        if let Err(e) = self.check(Command::Pull, &reference) {
            return Err(match e {
                RuntimeError::CommandRejected { reason, .. } => RuntimeError::ImagePullFailed {
                    image: reference,
                    reason,
                },
                other => other,
            });
        }
        self.images
            .lock()
            .expect("images lock poisoned")
            .insert(reference);
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        self.record(RuntimeCall::Create(spec.clone()));
        self.check(Command::Create, &spec.name)?;
        self.lifecycle(&spec.name, &["create"]).await;
        Ok(format!("id-{}", spec.name))
    }

    async fn start_container(&self, name: &str) -> Result<bool, RuntimeError> {
        self.record(RuntimeCall::Start(name.to_string()));
        self.check(Command::Start, name)?;
        if self.emit_lifecycle.load(Ordering::SeqCst) {
            self.emit_network("connect").await;
        }
        self.lifecycle(
            name,
            &[
                "start",
                "exec_create: /opt/mssql-tools/bin/sqlcmd",
                "exec_start: /opt/mssql-tools/bin/sqlcmd",
            ],
        )
        .await;
        Ok(true)
    }

    async fn stop_container(&self, name: &str) -> Result<bool, RuntimeError> {
        self.record(RuntimeCall::Stop(name.to_string()));
        self.check(Command::Stop, name)?;
        self.lifecycle(name, &["kill", "die", "stop"]).await;
        if self.emit_lifecycle.load(Ordering::SeqCst) {
            self.emit_network("disconnect").await;
        }
        Ok(true)
    }

    async fn remove_container(&self, name: &str, force: bool) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Remove {
            name: name.to_string(),
            force,
        });
        self.check(Command::Remove, name)?;
        self.lifecycle(name, &["destroy"]).await;
        Ok(())
    }

    async fn events(&self) -> Result<EventReader, RuntimeError> {
        self.record(RuntimeCall::Events);
        if !self.is_open() {
            return Err(RuntimeError::NotConnected);
        }
        let (writer, reader) = tokio::io::duplex(EVENT_PIPE_CAPACITY);
        *self.sink.lock().await = Some(writer);
        Ok(Box::pin(reader))
    }
}
