//! Server configuration loading.
//!
//! Environment variables are the sole config source.  `DATABASE_URL` is
//! required; everything else has a default.

use std::env;
use std::time::Duration;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_HEARTBEAT_IDLE_SECS: u64 = 30;
const DEFAULT_MAX_BODY_BYTES: usize = 5_242_880;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub log_level: String,
    pub db_max_connections: u32,
    /// Idle period after which a live stream emits a heartbeat.
    pub heartbeat_idle: Duration,
    pub max_body_bytes: usize,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|value| !value.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let bind_addr = lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_owned());
        let log_level = lookup("LOG_LEVEL").unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_owned());
        let db_max_connections =
            parse_or("DB_MAX_CONNECTIONS", &lookup, DEFAULT_DB_MAX_CONNECTIONS)?;
        if db_max_connections == 0 {
            return Err(ConfigError::Invalid {
                name: "DB_MAX_CONNECTIONS",
                reason: "must be at least 1".to_owned(),
            });
        }
        let heartbeat_idle_secs =
            parse_or("HEARTBEAT_IDLE_SECS", &lookup, DEFAULT_HEARTBEAT_IDLE_SECS)?;
        if heartbeat_idle_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "HEARTBEAT_IDLE_SECS",
                reason: "must be at least 1".to_owned(),
            });
        }
        let max_body_bytes = parse_or("MAX_BODY_BYTES", &lookup, DEFAULT_MAX_BODY_BYTES)?;

        Ok(Self {
            database_url,
            bind_addr,
            log_level,
            db_max_connections,
            heartbeat_idle: Duration::from_secs(heartbeat_idle_secs),
            max_body_bytes,
        })
    }
}

fn parse_or<T, F>(name: &'static str, lookup: &F, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse::<T>().map_err(|err| ConfigError::Invalid {
            name,
            reason: err.to_string(),
        }),
        None => Ok(default),
    }
}
