use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{name} has an invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// Unset means the in-memory store.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    /// Unset means the request origin is mirrored.
    pub cors_origin: Option<String>,
    pub broadcast_capacity: usize,
    pub connection_buffer: usize,
    pub watcher_retry: Duration,
    pub ping_interval: Duration,
    pub session_inactivity_secs: i64,
    /// Enables `Authorization: Bearer` identities when set.
    pub jwt_secret: Option<String>,
}

impl Config {
    /// Reads `.env` if present, then the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let text = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Ok(Config {
            bind_addr: parse(&lookup, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            database_url: text("DATABASE_URL"),
            database_max_connections: parse(&lookup, "DATABASE_MAX_CONNECTIONS", 20)?,
            cors_origin: text("CORS_ORIGIN"),
            broadcast_capacity: parse(&lookup, "BROADCAST_CAPACITY", 100)?,
            connection_buffer: parse(&lookup, "CONNECTION_BUFFER", 64)?,
            watcher_retry: Duration::from_secs(parse(&lookup, "WATCHER_RETRY_SECS", 5)?),
            ping_interval: Duration::from_secs(parse(&lookup, "PING_INTERVAL_SECS", 30)?),
            session_inactivity_secs: parse(&lookup, "SESSION_INACTIVITY_SECS", 360)?,
            jwt_secret: text("JWT_SECRET"),
        })
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(value) if value.trim().is_empty() => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}
