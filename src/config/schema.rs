//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.
//! Every section has defaults, so an empty file is a valid (if portless)
//! configuration.

use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the time server.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (interface, port, intake queue).
    pub listener: ListenerConfig,

    /// Per-connection behaviour.
    pub connection: ConnectionConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Interface to bind (e.g., "0.0.0.0" or "::1").
    pub interface: String,

    /// TCP port. `0` means not configured and fails validation.
    pub port: u16,

    /// Capacity of the queue between the accept loop and the dispatcher.
    pub intake_capacity: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            interface: "0.0.0.0".to_string(),
            port: 0,
            intake_capacity: 1024,
        }
    }
}

impl ListenerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        let ip: IpAddr = self.interface.parse()?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Per-connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Turn off TCP keep-alive on accepted sockets.
    pub disable_keepalive: bool,

    /// Set TCP_NODELAY on accepted sockets.
    pub disable_delay: bool,

    /// Abort the connection when a socket option cannot be applied.
    pub fatal_tuning_errors: bool,

    /// Deadline for writing the response, in seconds. `0` disables it.
    pub write_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            disable_keepalive: true,
            disable_delay: true,
            fatal_tuning_errors: false,
            write_timeout_secs: 10,
        }
    }
}

impl ConnectionConfig {
    pub fn write_timeout(&self) -> Option<Duration> {
        (self.write_timeout_secs > 0).then(|| Duration::from_secs(self.write_timeout_secs))
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, for development.
    #[default]
    Pretty,
    /// One JSON object per line, for log aggregation.
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Filter directive used when `RUST_LOG` is not set.
    pub log_level: String,

    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "time_server=info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listener.intake_capacity, 1024);
        assert_eq!(config.listener.port, 0);
        assert!(config.connection.disable_keepalive);
        assert!(config.connection.disable_delay);
        assert_eq!(config.connection.write_timeout(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn zero_write_timeout_disables_deadline() {
        let config = ConnectionConfig {
            write_timeout_secs: 0,
            ..ConnectionConfig::default()
        };
        assert_eq!(config.write_timeout(), None);
    }

    #[test]
    fn socket_addr_supports_ipv6() {
        let listener = ListenerConfig {
            interface: "::1".to_string(),
            port: 37,
            ..ListenerConfig::default()
        };
        assert_eq!(listener.socket_addr().unwrap().to_string(), "[::1]:37");
    }
}
