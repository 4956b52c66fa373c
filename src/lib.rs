//! Throwaway SQL Server containers for persistence integration tests.
//!
//! The [`docker`] module holds the lifecycle orchestrator and the event
//! pipeline it relies on; [`config`] resolves its settings from the
//! environment; [`cli`] is the `sqldock` command line.

pub mod cli;
pub mod config;
pub mod docker;
pub mod error;
pub mod testing;

pub use config::Config;
pub use docker::{ConnectionInfo, ContainerConfig, ContainerOrchestrator, SessionState};
pub use error::ConfigError;
