//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the forward proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, backlog, connection cap).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Buffering limits.
    pub limits: LimitsConfig,

    /// Proxy behavior switches.
    pub proxy: ProxySettings,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Interface to bind (e.g., "127.0.0.1").
    pub host: String,

    /// Port to bind. Zero asks the OS for an ephemeral port.
    pub port: u16,

    /// Pending-connection queue depth handed to `listen(2)`.
    pub backlog: u32,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl ListenerConfig {
    /// `host:port` string suitable for address resolution.
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            backlog: 2048,
            max_connections: 10_000,
        }
    }
}

/// Timeout configuration for the connection lifecycle.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Idle time allowed while waiting for a request head, in seconds.
    /// Zero or negative disables the timeout.
    pub keep_alive_timeout_secs: f64,

    /// Upstream dial deadline in seconds. Zero or negative waits forever.
    pub dial_timeout_secs: f64,

    /// Time allowed for in-flight connections to wind down on shutdown.
    pub shutdown_grace_secs: u64,
}

impl TimeoutConfig {
    /// Keep-alive idle timeout, if enabled.
    pub fn keep_alive(&self) -> Option<Duration> {
        positive_secs(self.keep_alive_timeout_secs)
    }

    /// Raw dial delay as consumed by the dial guard.
    pub fn dial_delay(&self) -> Option<f64> {
        Some(self.dial_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            keep_alive_timeout_secs: 5.0,
            dial_timeout_secs: 50.0,
            shutdown_grace_secs: 10,
        }
    }
}

fn positive_secs(secs: f64) -> Option<Duration> {
    if secs.is_finite() && secs > 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}

/// Buffering limits applied per connection.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Bytes that may be buffered before a complete request head is seen.
    pub max_incomplete_event_size: usize,

    /// Maximum number of header lines in a request head.
    pub max_headers: usize,

    /// Chunk size used by each relay pump.
    pub relay_buffer_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_incomplete_event_size: 16 * 1024,
            max_headers: 100,
            relay_buffer_size: 16 * 1024,
        }
    }
}

/// Behavior switches for the proxy core.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ProxySettings {
    /// Reserved: inject forwarded-for/forwarded-host headers. Accepted but inert.
    pub proxy_headers: bool,

    /// Send a minimal 400/502/504 response before dropping a failed connection.
    pub error_responses: bool,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            proxy_headers: true,
            error_responses: true,
        }
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
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
