//! Configuration resolved from `SQLDOCK_*` environment variables.
//!
//! A `.env` file in the working directory is loaded by the binary before
//! resolution; explicit environment variables win over it.

mod database;
mod helpers;

pub use self::database::DatabaseConfig;

use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub database: DatabaseConfig,
}

impl Config {
    /// Resolve from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&helpers::process_env)
    }

    /// Resolve from an arbitrary key lookup.
    ///
    /// Blank values are treated as unset.
    pub fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<Option<String>, ConfigError>,
    {
        Ok(Self {
            database: DatabaseConfig::resolve(lookup)?,
        })
    }
}
