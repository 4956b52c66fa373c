//! Configuration for the managed database container.

use std::ops::Range;
use std::time::Duration;

use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

use crate::docker::connection::ConnectionInfo;
use crate::docker::error::{OrchestratorError, Result};
use crate::docker::event::ContainerStatus;
use crate::docker::runtime::ContainerSpec;

/// SQL Server image for Windows hosts.
pub const WINDOWS_IMAGE: &str = "microsoft/mssql-server-windows-express";

/// SQL Server image for every other host.
pub const LINUX_IMAGE: &str = "mcr.microsoft.com/mssql/server";

/// Port SQL Server listens on inside the container.
pub const SQL_SERVER_PORT: u16 = 1433;

/// Image matching the host operating system family.
pub fn default_image() -> &'static str {
    if std::env::consts::OS == "windows" {
        WINDOWS_IMAGE
    } else {
        LINUX_IMAGE
    }
}

/// Configuration for the database container and its orchestration.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Prefix for generated container names.
    pub name_prefix: String,
    /// Image to run, without tag.
    pub image: String,
    /// Image tag.
    pub tag: String,
    /// Port inside the container.
    pub container_port: u16,
    /// Host ports to pick from, end exclusive.
    pub host_ports: Range<u16>,
    /// Extra environment variables: (name, value).
    pub env: Vec<(String, String)>,
    /// SA login password, passed to the container as `SA_PASSWORD`.
    pub sa_password: SecretString,
    /// Database named in the connection string.
    pub database: String,
    /// Login named in the connection string.
    pub user: String,
    /// Host named in the connection string.
    pub host: String,
    /// Allocate a TTY for the container.
    pub tty: bool,
    /// Status mask that marks the container as executing.
    pub ready_status: ContainerStatus,
    /// Pause after the ready status before the database is handed out.
    pub settle_delay: Duration,
    /// Bound on waiting for the ready status.
    pub startup_timeout: Option<Duration>,
    /// Bound on each teardown wait (stopped, destroyed).
    pub stop_timeout: Option<Duration>,
    /// Bound applied to `wait_until_status` calls. `None` waits forever.
    pub wait_timeout: Option<Duration>,
    /// How long `stop()` waits for the monitor task to finish.
    pub monitor_join_timeout: Duration,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            name_prefix: "sqlserver".to_string(),
            image: default_image().to_string(),
            tag: "latest".to_string(),
            container_port: SQL_SERVER_PORT,
            host_ports: 9000..10000,
            env: Vec::new(),
            sa_password: SecretString::from("l0lTh1sIsOpenSource"),
            database: "akka_persistence_tests".to_string(),
            user: "sa".to_string(),
            host: "localhost".to_string(),
            tty: true,
            ready_status: ContainerStatus::EXEC_START,
            settle_delay: Duration::from_secs(10),
            startup_timeout: Some(Duration::from_secs(180)),
            stop_timeout: Some(Duration::from_secs(60)),
            wait_timeout: None,
            monitor_join_timeout: Duration::from_secs(1),
        }
    }
}

impl ContainerConfig {
    /// Generate a fresh container name.
    pub fn container_name(&self) -> String {
        format!("{}-{}", self.name_prefix, Uuid::new_v4().simple())
    }

    /// Image reference including tag.
    pub fn image_reference(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }

    /// Pick a host port uniformly at random from `host_ports`.
    pub fn pick_host_port(&self) -> Result<u16> {
        if self.host_ports.is_empty() {
            return Err(OrchestratorError::Config {
                reason: format!("host port range {:?} is empty", self.host_ports),
            });
        }
        Ok(rand::thread_rng().gen_range(self.host_ports.clone()))
    }

    /// Environment passed to the container.
    pub fn container_env(&self) -> Vec<String> {
        let mut env = vec![
            "ACCEPT_EULA=Y".to_string(),
            format!("SA_PASSWORD={}", self.sa_password.expose_secret()),
        ];
        env.extend(self.env.iter().map(|(k, v)| format!("{}={}", k, v)));
        env
    }

    /// Build the create command for `name` bound to `host_port`.
    pub fn container_spec(&self, name: &str, host_port: u16) -> ContainerSpec {
        ContainerSpec {
            name: name.to_string(),
            image: self.image_reference(),
            container_port: self.container_port,
            host_port,
            env: self.container_env(),
            tty: self.tty,
        }
    }

    /// Connection descriptor for a container bound to `host_port`.
    pub fn connection_info(&self, host_port: u16) -> ConnectionInfo {
        ConnectionInfo {
            host: self.host.clone(),
            port: host_port,
            database: self.database.clone(),
            user: self.user.clone(),
            password: self.sa_password.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ContainerConfig::default();
        assert_eq!(config.container_port, 1433);
        assert_eq!(config.host_ports, 9000..10000);
        assert_eq!(config.ready_status, ContainerStatus::EXEC_START);
        assert_eq!(config.image, default_image());
        assert_eq!(config.monitor_join_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_container_names_are_unique() {
        let config = ContainerConfig::default();
        let a = config.container_name();
        let b = config.container_name();
        assert!(a.starts_with("sqlserver-"));
        assert_eq!(a.len(), "sqlserver-".len() + 32);
        assert_ne!(a, b);
    }

    #[test]
    fn test_host_port_in_range() {
        let config = ContainerConfig {
            host_ports: 9000..9003,
            ..Default::default()
        };
        for _ in 0..100 {
            let port = config.pick_host_port().unwrap();
            assert!((9000..9003).contains(&port));
        }
    }

    #[test]
    fn test_empty_port_range_is_rejected() {
        let config = ContainerConfig {
            host_ports: 9000..9000,
            ..Default::default()
        };
        assert!(matches!(
            config.pick_host_port(),
            Err(OrchestratorError::Config { .. })
        ));
    }

    #[test]
    fn test_container_spec() {
        let config = ContainerConfig {
            image: "mcr.microsoft.com/mssql/server".to_string(),
            tag: "2019-latest".to_string(),
            env: vec![("MSSQL_PID".to_string(), "Express".to_string())],
            sa_password: SecretString::from("pw"),
            ..Default::default()
        };

        let spec = config.container_spec("sqlserver-abc", 9500);
        assert_eq!(spec.image, "mcr.microsoft.com/mssql/server:2019-latest");
        assert_eq!(spec.host_port, 9500);
        assert_eq!(spec.port_key(), "1433/tcp");
        assert_eq!(
            spec.env,
            vec!["ACCEPT_EULA=Y", "SA_PASSWORD=pw", "MSSQL_PID=Express"]
        );
        assert!(spec.tty);
    }

    #[test]
    fn test_connection_info_uses_host_port() {
        let info = ContainerConfig::default().connection_info(9876);
        assert_eq!(info.port, 9876);
        assert_eq!(info.host, "localhost");
        assert_eq!(info.user, "sa");
    }
}
