//! Error types for container orchestration.

use std::time::Duration;

use thiserror::Error;

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors reported by a [`ContainerRuntime`](crate::docker::ContainerRuntime).
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Docker daemon could not be reached.
    #[error("Docker not available: {reason}")]
    DockerNotAvailable {
        /// Reason why Docker is unavailable.
        reason: String,
    },

    /// A command was issued before `open()` or after `close()`.
    #[error("Docker client is not open")]
    NotConnected,

    /// Failed to pull the image.
    #[error("Failed to pull image '{image}': {reason}")]
    ImagePullFailed {
        /// Image reference.
        image: String,
        /// Reason for failure.
        reason: String,
    },

    /// The daemon rejected a container command.
    #[error("Docker rejected {command} for '{target}': {reason}")]
    CommandRejected {
        /// Command name (create, start, stop, remove, list).
        command: &'static str,
        /// Container or image the command targeted.
        target: String,
        /// Reason for failure.
        reason: String,
    },
}

/// Errors raised while classifying a decoded event record.
///
/// Both variants are fatal to the one record only.
#[derive(Debug, Error)]
pub enum EventError {
    /// The record is not valid JSON or lacks the fields of its declared kind.
    #[error("Malformed event record: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The record declares a kind this crate does not track.
    #[error("Unknown event kind '{0}'")]
    UnknownKind(String),
}

/// Errors raised by a status wait.
#[derive(Debug, Error)]
pub enum WaitError {
    /// No matching status was observed in time.
    #[error("Timed out after {timeout:?} waiting for status {mask}")]
    TimedOut {
        /// The awaited status mask.
        mask: String,
        /// The bound that elapsed.
        timeout: Duration,
    },

    /// The wait was cancelled before a matching status arrived.
    #[error("Cancelled while waiting for status {mask}")]
    Cancelled {
        /// The awaited status mask.
        mask: String,
    },
}

/// Errors surfaced to callers of the
/// [`ContainerOrchestrator`](crate::docker::ContainerOrchestrator).
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// `start()` was called while a session is active.
    #[error("Container '{name}' is already managed by this orchestrator")]
    AlreadyStarted {
        /// Container name of the active session.
        name: String,
    },

    /// An operation needs a session but none is active.
    #[error("No container session is active")]
    NotStarted,

    /// The orchestrator was stopped and cannot be reused.
    #[error("Orchestrator has been terminated")]
    Terminated,

    /// A previous start failed; call `stop()` to clean up.
    #[error("Previous start of '{name}' failed; call stop() to tear it down")]
    PreviousStartFailed {
        /// Container name of the failed session.
        name: String,
    },

    /// Configuration cannot be used.
    #[error("Container configuration error: {reason}")]
    Config {
        /// Reason for error.
        reason: String,
    },

    /// A runtime command failed.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// A status wait did not complete.
    #[error(transparent)]
    Wait(#[from] WaitError),
}
