use std::time::Duration;

use secrecy::SecretString;

use crate::config::helpers::{Lookup, optional_env, parse_optional_env};
use crate::docker::{ContainerConfig, ContainerStatus, default_image};
use crate::error::ConfigError;

/// Database container configuration.
///
/// Describes the SQL Server container the persistence tests run against.
/// Every field can be overridden with an `SQLDOCK_*` environment variable.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Image to run (default depends on the host OS).
    pub image: String,
    /// Image tag.
    pub image_tag: String,
    /// Prefix for generated container names.
    pub container_prefix: String,
    /// Lowest host port to bind (inclusive).
    pub port_min: u16,
    /// Highest host port to bind (exclusive).
    pub port_max: u16,
    /// SA password passed to the container.
    pub sa_password: SecretString,
    /// Database named in the connection string.
    pub database: String,
    /// Status mask that marks the container ready, e.g. `Start | ExecStart`.
    pub ready_status: ContainerStatus,
    /// Seconds to wait after the ready status.
    pub settle_delay_secs: u64,
    /// Seconds to wait for the ready status (0 = no limit).
    pub startup_timeout_secs: u64,
    /// Seconds to wait for each teardown status (0 = no limit).
    pub stop_timeout_secs: u64,
    /// Seconds bound on `wait_until_status` (0 = no limit).
    pub wait_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            image: default_image().to_string(),
            image_tag: "latest".to_string(),
            container_prefix: "sqlserver".to_string(),
            port_min: 9000,
            port_max: 10000,
            sa_password: SecretString::from("l0lTh1sIsOpenSource"),
            database: "akka_persistence_tests".to_string(),
            ready_status: ContainerStatus::EXEC_START,
            settle_delay_secs: 10,
            startup_timeout_secs: 180,
            stop_timeout_secs: 60,
            wait_timeout_secs: 0,
        }
    }
}

impl DatabaseConfig {
    pub(crate) fn resolve(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let ready_status = match optional_env(lookup, "SQLDOCK_READY_STATUS")? {
            Some(raw) => {
                let mask = raw.parse::<ContainerStatus>().map_err(|message| {
                    ConfigError::InvalidValue {
                        key: "SQLDOCK_READY_STATUS".to_string(),
                        message,
                    }
                })?;
                if mask.is_none() {
                    return Err(ConfigError::InvalidValue {
                        key: "SQLDOCK_READY_STATUS".to_string(),
                        message: "must name at least one status".to_string(),
                    });
                }
                mask
            }
            None => defaults.ready_status,
        };

        let config = Self {
            image: optional_env(lookup, "SQLDOCK_IMAGE")?.unwrap_or(defaults.image),
            image_tag: optional_env(lookup, "SQLDOCK_IMAGE_TAG")?.unwrap_or(defaults.image_tag),
            container_prefix: optional_env(lookup, "SQLDOCK_CONTAINER_PREFIX")?
                .unwrap_or(defaults.container_prefix),
            port_min: parse_optional_env(lookup, "SQLDOCK_PORT_MIN", defaults.port_min)?,
            port_max: parse_optional_env(lookup, "SQLDOCK_PORT_MAX", defaults.port_max)?,
            sa_password: optional_env(lookup, "SQLDOCK_SA_PASSWORD")?
                .map(SecretString::from)
                .unwrap_or(defaults.sa_password),
            database: optional_env(lookup, "SQLDOCK_DATABASE")?.unwrap_or(defaults.database),
            ready_status,
            settle_delay_secs: parse_optional_env(
                lookup,
                "SQLDOCK_SETTLE_DELAY_SECS",
                defaults.settle_delay_secs,
            )?,
            startup_timeout_secs: parse_optional_env(
                lookup,
                "SQLDOCK_STARTUP_TIMEOUT_SECS",
                defaults.startup_timeout_secs,
            )?,
            stop_timeout_secs: parse_optional_env(
                lookup,
                "SQLDOCK_STOP_TIMEOUT_SECS",
                defaults.stop_timeout_secs,
            )?,
            wait_timeout_secs: parse_optional_env(
                lookup,
                "SQLDOCK_WAIT_TIMEOUT_SECS",
                defaults.wait_timeout_secs,
            )?,
        };

        if config.port_min == 0 || config.port_min >= config.port_max {
            return Err(ConfigError::InvalidValue {
                key: "SQLDOCK_PORT_MIN".to_string(),
                message: format!(
                    "port range {}..{} must be non-empty and start above 0",
                    config.port_min, config.port_max
                ),
            });
        }

        Ok(config)
    }

    /// Build the orchestrator configuration.
    pub fn to_container_config(&self) -> ContainerConfig {
        ContainerConfig {
            name_prefix: self.container_prefix.clone(),
            image: self.image.clone(),
            tag: self.image_tag.clone(),
            host_ports: self.port_min..self.port_max,
            sa_password: self.sa_password.clone(),
            database: self.database.clone(),
            ready_status: self.ready_status,
            settle_delay: Duration::from_secs(self.settle_delay_secs),
            startup_timeout: bounded(self.startup_timeout_secs),
            stop_timeout: bounded(self.stop_timeout_secs),
            wait_timeout: bounded(self.wait_timeout_secs),
            ..Default::default()
        }
    }
}

fn bounded(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn resolve_with(vars: &[(&str, &str)]) -> Result<DatabaseConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let lookup = move |key: &str| Ok::<_, ConfigError>(map.get(key).cloned());
        DatabaseConfig::resolve(&lookup)
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = resolve_with(&[]).unwrap();
        assert_eq!(config.port_min, 9000);
        assert_eq!(config.port_max, 10000);
        assert_eq!(config.ready_status, ContainerStatus::EXEC_START);
        assert_eq!(config.sa_password.expose_secret(), "l0lTh1sIsOpenSource");
    }

    #[test]
    fn test_overrides() {
        let config = resolve_with(&[
            ("SQLDOCK_IMAGE", "mcr.microsoft.com/mssql/server"),
            ("SQLDOCK_IMAGE_TAG", "2022-latest"),
            ("SQLDOCK_PORT_MIN", "9500"),
            ("SQLDOCK_PORT_MAX", "9600"),
            ("SQLDOCK_SA_PASSWORD", "S3cret!"),
            ("SQLDOCK_READY_STATUS", "Start | ExecStart"),
            ("SQLDOCK_WAIT_TIMEOUT_SECS", "30"),
        ])
        .unwrap();

        let container = config.to_container_config();
        assert_eq!(container.image_reference(), "mcr.microsoft.com/mssql/server:2022-latest");
        assert_eq!(container.host_ports, 9500..9600);
        assert_eq!(container.sa_password.expose_secret(), "S3cret!");
        assert_eq!(
            container.ready_status,
            ContainerStatus::START | ContainerStatus::EXEC_START
        );
        assert_eq!(container.wait_timeout, Some(Duration::from_secs(30)));
        assert_eq!(container.startup_timeout, Some(Duration::from_secs(180)));
    }

    #[test]
    fn test_zero_timeout_means_unbounded() {
        let config = resolve_with(&[("SQLDOCK_STARTUP_TIMEOUT_SECS", "0")]).unwrap();
        assert_eq!(config.to_container_config().startup_timeout, None);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            resolve_with(&[("SQLDOCK_PORT_MIN", "10000"), ("SQLDOCK_PORT_MAX", "9000")]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            resolve_with(&[("SQLDOCK_READY_STATUS", "Running")]),
            Err(ConfigError::InvalidValue { key, .. }) if key == "SQLDOCK_READY_STATUS"
        ));
        assert!(matches!(
            resolve_with(&[("SQLDOCK_SETTLE_DELAY_SECS", "soon")]),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
