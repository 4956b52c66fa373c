//! Connection descriptor handed to the persistence layer once the database
//! container is ready.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};

/// Where and how to reach the running database.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Host address (usually localhost).
    pub host: String,
    /// Port bound on the host.
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Login name.
    pub user: String,
    /// Login password.
    pub password: SecretString,
}

impl ConnectionInfo {
    /// SQL Server connection string, password included.
    ///
    /// The persistence configuration consumes this verbatim.
    pub fn connection_string(&self) -> String {
        format!(
            "Data Source={},{};Initial Catalog={};User ID={};Password={}",
            self.host,
            self.port,
            self.database,
            self.user,
            self.password.expose_secret()
        )
    }

    /// Host and port in `host:port` form.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Renders the connection string with the password redacted.
impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Data Source={},{};Initial Catalog={};User ID={};Password=***",
            self.host, self.port, self.database, self.user
        )
    }
}
