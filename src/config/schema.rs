//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits; keys are camelCase in every source
//! (`rateLimit.permitLimit`, `jwt.requireHttps`, ...).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
///
/// Built once at startup from the layered sources, validated, then shared
/// read-only behind an `Arc` for the remainder of the process lifetime.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Identity provider settings for bearer-token validation.
    pub jwt: JwtConfig,

    /// Fixed-window rate limiting.
    pub rate_limit: RateLimitConfig,

    /// CORS policy.
    pub cors: CorsConfig,

    /// Trusted proxy header resolution.
    pub forwarded_headers: ForwardedHeadersConfig,

    /// Route table handed to the proxy dispatcher.
    pub proxy: ProxyConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Bearer-token validation settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct JwtConfig {
    /// Token issuer; signing keys are discovered from its OpenID metadata.
    pub authority: String,

    /// Expected `aud` claim.
    pub audience: String,

    /// Refuse to fetch identity metadata over plain HTTP.
    pub require_https: bool,

    /// Scopes an identity must hold to pass authorization.
    pub required_scopes: Vec<String>,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            authority: String::new(),
            audience: String::new(),
            require_https: true,
            required_scopes: Vec::new(),
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// Requests admitted per client key per window.
    pub permit_limit: u32,

    /// Window length in minutes.
    pub window_minutes: u32,

    /// Requests allowed to wait for the next window (0 = reject immediately).
    pub queue_limit: u32,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(u64::from(self.window_minutes) * 60)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            permit_limit: 600,
            window_minutes: 1,
            queue_limit: 0,
        }
    }
}

/// CORS policy. A single `"*"` entry means "any".
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub allowed_methods: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        let any = || vec!["*".to_string()];
        Self {
            allowed_origins: any(),
            allowed_headers: any(),
            allowed_methods: any(),
        }
    }
}

/// Which peers may rewrite the client address through `X-Forwarded-*`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ForwardedHeadersConfig {
    /// Peer addresses whose forwarded headers are trusted.
    pub known_proxies: Vec<String>,

    /// Maximum number of `X-Forwarded-For` entries consumed.
    pub forward_limit: usize,
}

impl Default for ForwardedHeadersConfig {
    fn default() -> Self {
        Self {
            known_proxies: vec!["127.0.0.1".to_string(), "::1".to_string()],
            forward_limit: 1,
        }
    }
}

/// Route table for the proxy dispatcher.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ProxyConfig {
    /// Upstream request timeout in seconds.
    pub request_timeout_secs: u64,

    pub routes: Vec<RouteConfig>,

    pub clusters: Vec<ClusterConfig>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            routes: Vec::new(),
            clusters: Vec::new(),
        }
    }
}

/// Route configuration mapping a path prefix to a cluster.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteConfig {
    /// Route identifier for logging.
    pub route_id: String,

    /// Path prefix to match.
    pub path_prefix: String,

    /// Cluster to forward to.
    pub cluster_id: String,
}

/// Upstream cluster.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    pub cluster_id: String,

    /// Base URL of the upstream (e.g., "http://10.0.0.12:3000").
    pub address: String,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error), overridden by `RUST_LOG`.
    pub log_level: String,

    /// "json" or "pretty".
    pub log_format: String,

    /// Enable the Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
