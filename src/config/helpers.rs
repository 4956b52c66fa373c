use std::env::VarError;
use std::fmt::Display;
use std::str::FromStr;

use crate::error::ConfigError;

/// Source of configuration values, keyed by variable name.
pub(crate) type Lookup<'a> = &'a dyn Fn(&str) -> Result<Option<String>, ConfigError>;

/// Read a variable from the process environment.
pub(crate) fn process_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "not valid unicode".to_string(),
        }),
    }
}

/// Look up `key`, treating a blank value the same as an unset one.
pub(crate) fn optional_env(lookup: Lookup<'_>, key: &str) -> Result<Option<String>, ConfigError> {
    Ok(lookup(key)?.filter(|value| !value.trim().is_empty()))
}

pub(crate) fn parse_optional_env<T>(lookup: Lookup<'_>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match optional_env(lookup, key)? {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}
