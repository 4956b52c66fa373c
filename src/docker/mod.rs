//! SQL Server test container lifecycle, driven by the Docker event stream.
//!
//! The orchestrator never polls the container. It issues commands through a
//! [`ContainerRuntime`] and learns their outcome from the daemon's event
//! stream, which a background monitor decodes and classifies into status
//! masks published on two [`StatusBroadcaster`]s.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                          ContainerOrchestrator                            │
//! │                                                                          │
//! │   start()                                                                │
//! │      │                                                                   │
//! │      ▼                                                                   │
//! │   ┌────────────┐    ┌────────────┐    ┌──────────────┐    ┌───────────┐  │
//! │   │ Open Client│───▶│ Pull Image │───▶│ Create Start │───▶│ Wait Ready│  │
//! │   │ + Monitor  │    │ (if needed)│    │  Container   │    │  Status   │  │
//! │   └────────────┘    └────────────┘    └──────────────┘    └───────────┘  │
//! │         │                                                       ▲        │
//! │         ▼                                                       │        │
//! │   ┌────────────┐    ┌────────────┐    ┌──────────────┐          │        │
//! │   │ Event Bytes│───▶│  Decoder   │───▶│   classify   │──────────┘        │
//! │   │ (unframed) │    │ (records)  │    │ → broadcaster│                   │
//! │   └────────────┘    └────────────┘    └──────────────┘                   │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use sqldock::docker::{ContainerConfig, ContainerOrchestrator};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = ContainerOrchestrator::docker(ContainerConfig::default());
//!
//! let connection = orchestrator.start().await?;
//! println!("{}", connection.connection_string());
//!
//! orchestrator.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod broadcaster;
pub mod config;
pub mod connection;
pub mod decoder;
pub mod error;
pub mod event;
pub mod monitor;
pub mod orchestrator;
pub mod runtime;

pub use broadcaster::{StatusBroadcaster, Subscription, SubscriptionId, WaitOptions};
pub use config::{ContainerConfig, LINUX_IMAGE, SQL_SERVER_PORT, WINDOWS_IMAGE, default_image};
pub use connection::ConnectionInfo;
pub use decoder::{EventDecoder, RawEventRecord, decode_records};
pub use error::{EventError, OrchestratorError, Result, RuntimeError, WaitError};
pub use event::{
    ClassifiedEvent, ContainerEvent, ContainerStatus, EventKind, NetworkEvent, NetworkStatus,
    StatusMask, classify,
};
pub use monitor::spawn_event_monitor;
pub use orchestrator::{ContainerOrchestrator, SessionState};
pub use runtime::{ContainerRuntime, ContainerSpec, DockerRuntime, EventReader, connect_docker};
