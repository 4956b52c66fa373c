//! Crate-wide error types that are not tied to the Docker subsystem.

use thiserror::Error;

/// Errors raised while resolving configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable is set but cannot be used.
    #[error("Invalid value for '{key}': {message}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What is wrong with the value.
        message: String,
    },
}
