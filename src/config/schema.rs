//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the RPC
//! endpoint. All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the RPC endpoint.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// RPC server options (address lists, acceptor and worker sizing).
    pub rpc: RpcOptions,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Options read once by [`RpcServer::init`](crate::lifecycle::RpcServer::init).
///
/// Address lists are comma-separated `host[:port]` tokens. An empty string
/// means the list is not configured.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct RpcOptions {
    /// Addresses to bind to for RPC connections.
    pub bind_addresses: String,

    /// Addresses to advertise to clients. Derived from the bound addresses
    /// when empty.
    pub advertised_addresses: String,

    /// Additional local listeners for traffic forwarded by a TCP proxy.
    pub proxied_addresses: String,

    /// Endpoints on the external side of the proxy. Never bound locally.
    pub proxy_advertised_addresses: String,

    /// Number of accept tasks per bound address.
    pub acceptors_per_address: usize,

    /// Number of worker threads per registered service.
    pub service_threads: usize,

    /// Port substituted when a token omits one.
    pub default_port: u16,

    /// Depth of the bounded queue in front of each service's workers.
    pub service_queue_length: usize,

    /// Set SO_REUSEPORT on listening sockets.
    pub reuse_port: bool,

    /// Permit port 0 on bind and proxied addresses. Only meant for tests.
    pub allow_ephemeral_ports: bool,

    /// Maximum concurrent connections accepted per bound address.
    pub max_connections_per_address: usize,
}

impl Default for RpcOptions {
    fn default() -> Self {
        Self {
            bind_addresses: "0.0.0.0".to_string(),
            advertised_addresses: String::new(),
            proxied_addresses: String::new(),
            proxy_advertised_addresses: String::new(),
            acceptors_per_address: 1,
            service_threads: 10,
            default_port: 0,
            service_queue_length: 50,
            reuse_port: false,
            allow_ephemeral_ports: false,
            max_connections_per_address: 10_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    /// Log output format: `compact` or `json`.
    pub log_format: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "compact".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
