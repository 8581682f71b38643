//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, limits, TLS passthrough).
    pub listener: ListenerConfig,

    /// Proxied services, selected by longest matching accept prefix.
    pub services: Vec<ServiceConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Upper bound on a request or response head.
    pub max_header_bytes: usize,

    /// Forward connections that open with a TLS ClientHello to this target
    /// without terminating them.
    pub tls_passthrough: Option<TlsPassthroughConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
            max_header_bytes: 64 * 1024,
            tls_passthrough: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TlsPassthroughConfig {
    /// Target address (e.g., "10.0.0.5:443").
    pub target: String,
}

/// How `Forwarded` / `X-Forwarded-*` headers are handled on the connect side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ForwardedPolicy {
    /// Append this hop to the forwarded headers.
    Inject,
    /// Remove forwarded headers before forwarding.
    Exclude,
    /// Pass forwarded headers through untouched.
    #[default]
    Ignore,
}

/// One proxied service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Service identifier for logging/metrics.
    pub name: String,

    /// Path prefix requests must fall under (e.g., "/events").
    #[serde(default = "default_accept_prefix")]
    pub accept_prefix: String,

    /// Connect URIs (e.g., "http://127.0.0.1:3000/stream"), used round-robin.
    pub connect: Vec<String>,

    #[serde(default)]
    pub forwarded: ForwardedPolicy,

    /// Header names treated as hop-by-hop in addition to the ones listed in
    /// `Connection`.
    #[serde(default)]
    pub hop_by_hop: Vec<String>,

    /// Location prefix rewrites (connect-side prefix → accept-side prefix).
    #[serde(default)]
    pub location_rewrites: BTreeMap<String, String>,

    /// Set-Cookie Domain rewrites.
    #[serde(default)]
    pub cookie_domain_rewrites: BTreeMap<String, String>,

    /// Set-Cookie Path rewrites.
    #[serde(default)]
    pub cookie_path_rewrites: BTreeMap<String, String>,

    /// Cache-Control directives added to responses that lack one.
    #[serde(default)]
    pub cache_control: Vec<CacheControlRule>,

    /// Serve further requests on the same accept connection.
    #[serde(default = "default_true")]
    pub keep_alive: bool,

    /// Gzip response bodies for clients that accept it, unless the backend
    /// already set a `Content-Encoding`.
    #[serde(default)]
    pub gzip: bool,

    /// Open every forwarded event stream with the padding record, for
    /// clients that buffer the first few kilobytes.
    #[serde(default)]
    pub sse_padding: bool,
}

fn default_accept_prefix() -> String {
    "/".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CacheControlRule {
    /// URL glob; `*` within a segment, `**` across segments.
    pub pattern: String,

    /// Value for the Cache-Control header.
    pub directive: String,
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutConfig {
    /// Connect-side establishment timeout in seconds.
    pub connect_secs: u64,

    /// Idle keep-alive accept connections are closed after this many seconds.
    pub idle_secs: u64,

    /// Grace period for in-flight sessions on shutdown, in seconds.
    pub shutdown_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            idle_secs: 60,
            shutdown_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
