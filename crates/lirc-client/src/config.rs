//! Connection configuration

use lirc_core::{LircError, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Socket lircd listens on by default
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/lirc/lircd";

/// Port of `lircd --listen` when none is given
pub const DEFAULT_TCP_PORT: u16 = 8765;

/// Environment variable naming the socket path or `host:port`
pub const ENV_SOCKET_PATH: &str = "LIRC_SOCKET_PATH";

/// Environment variable with the reply timeout in milliseconds
pub const ENV_REPLY_TIMEOUT_MS: &str = "LIRC_REPLY_TIMEOUT_MS";

/// Where lircd is reachable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Unix domain socket path
    Unix(PathBuf),
    /// TCP `host:port`
    Tcp(String),
}

impl Endpoint {
    /// TCP endpoint, appending [`DEFAULT_TCP_PORT`] when `host` has no port
    pub fn tcp(host: &str) -> Result<Self> {
        let host = host.trim();
        match host.rsplit_once(':') {
            Some((name, port)) => {
                if name.is_empty() {
                    return Err(LircError::ConfigError(format!("missing host in {:?}", host)));
                }
                port.parse::<u16>().map_err(|_| {
                    LircError::ConfigError(format!("invalid port {:?} in {:?}", port, host))
                })?;
                Ok(Endpoint::Tcp(host.to_string()))
            }
            None if host.is_empty() => {
                Err(LircError::ConfigError("empty lircd host".to_string()))
            }
            None => Ok(Endpoint::Tcp(format!("{}:{}", host, DEFAULT_TCP_PORT))),
        }
    }
}

impl FromStr for Endpoint {
    type Err = LircError;

    /// `host:port` is TCP, anything else is a socket path
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(LircError::ConfigError("empty lircd endpoint".to_string()));
        }
        if !s.contains('/') && s.contains(':') {
            Endpoint::tcp(s)
        } else {
            Ok(Endpoint::Unix(PathBuf::from(s)))
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "{}", path.display()),
            Endpoint::Tcp(address) => write!(f, "tcp://{}", address),
        }
    }
}

/// Configuration for a lircd client
#[derive(Debug, Clone)]
pub struct LircConfig {
    /// Where to connect
    pub endpoint: Endpoint,
    /// Give up waiting for a reply after this long (None waits forever)
    pub reply_timeout: Option<Duration>,
    /// Buffered events per [`events`](crate::LircClient::events) subscriber
    pub event_capacity: usize,
    /// Buffered replies per [`replies`](crate::LircClient::replies) subscriber
    pub reply_capacity: usize,
    /// Commands that may wait for the reader at once
    pub request_capacity: usize,
}

impl Default for LircConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::Unix(PathBuf::from(DEFAULT_SOCKET_PATH)),
            reply_timeout: None,
            event_capacity: 64,
            reply_capacity: 16,
            request_capacity: 16,
        }
    }
}

impl LircConfig {
    /// Default config pointed at `endpoint`
    pub fn with_endpoint(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            ..Default::default()
        }
    }

    /// Set the reply timeout
    pub fn reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = Some(timeout);
        self
    }

    /// Defaults overridden by `LIRC_SOCKET_PATH` and `LIRC_REPLY_TIMEOUT_MS`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(endpoint) = lookup(ENV_SOCKET_PATH) {
            config.endpoint = endpoint.parse()?;
        }

        if let Some(ms) = lookup(ENV_REPLY_TIMEOUT_MS) {
            let ms = ms.trim().parse::<u64>().map_err(|_| {
                LircError::ConfigError(format!("{} must be milliseconds, got {:?}", ENV_REPLY_TIMEOUT_MS, ms))
            })?;
            config.reply_timeout = Some(Duration::from_millis(ms));
        }

        Ok(config)
    }
}
