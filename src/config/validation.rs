//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (rate limit bounds, window length)
//! - Check that the identity authority and CORS entries are well-formed
//! - Check referential integrity (routes reference existing clusters)
//!
//! # Design Decisions
//! - Stops at the first invalid field and names it
//! - Validation is a pure function: &GatewayConfig → Result<(), ValidationError>
//! - Runs before any listener is bound

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::ops::RangeInclusive;

use axum::http::{HeaderName, HeaderValue, Method};
use thiserror::Error;
use url::Url;

use crate::config::schema::GatewayConfig;

pub const PERMIT_LIMIT_RANGE: RangeInclusive<u32> = 1..=10_000;
pub const WINDOW_MINUTES_RANGE: RangeInclusive<u32> = 1..=60;
pub const QUEUE_LIMIT_RANGE: RangeInclusive<u32> = 0..=1_000;

/// The first configuration field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid configuration `{field}`: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Validate a fully merged configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), ValidationError> {
    validate_listener(config)?;
    validate_jwt(config)?;
    validate_rate_limit(config)?;
    validate_cors(config)?;
    validate_forwarded_headers(config)?;
    validate_proxy(config)?;
    validate_observability(config)?;
    Ok(())
}

fn validate_listener(config: &GatewayConfig) -> Result<(), ValidationError> {
    config
        .listener
        .bind_address
        .parse::<SocketAddr>()
        .map(|_| ())
        .map_err(|e| ValidationError::new("listener.bindAddress", e.to_string()))
}

fn validate_jwt(config: &GatewayConfig) -> Result<(), ValidationError> {
    let jwt = &config.jwt;
    if jwt.authority.trim().is_empty() {
        return Err(ValidationError::new("jwt.authority", "is required"));
    }
    let authority = Url::parse(&jwt.authority)
        .map_err(|e| ValidationError::new("jwt.authority", format!("not a valid URL: {e}")))?;
    if !matches!(authority.scheme(), "http" | "https") {
        return Err(ValidationError::new(
            "jwt.authority",
            format!("unsupported scheme `{}`", authority.scheme()),
        ));
    }
    if jwt.require_https && authority.scheme() != "https" {
        return Err(ValidationError::new(
            "jwt.authority",
            "must use https while jwt.requireHttps is enabled",
        ));
    }
    if jwt.audience.trim().is_empty() {
        return Err(ValidationError::new("jwt.audience", "is required"));
    }
    Ok(())
}

fn validate_rate_limit(config: &GatewayConfig) -> Result<(), ValidationError> {
    let rl = &config.rate_limit;
    check_range("rateLimit.permitLimit", rl.permit_limit, PERMIT_LIMIT_RANGE)?;
    check_range("rateLimit.windowMinutes", rl.window_minutes, WINDOW_MINUTES_RANGE)?;
    check_range("rateLimit.queueLimit", rl.queue_limit, QUEUE_LIMIT_RANGE)?;
    Ok(())
}

fn check_range(field: &str, value: u32, range: RangeInclusive<u32>) -> Result<(), ValidationError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::new(
            field,
            format!("{value} is outside [{}, {}]", range.start(), range.end()),
        ))
    }
}

fn validate_cors(config: &GatewayConfig) -> Result<(), ValidationError> {
    let cors = &config.cors;
    for origin in cors.allowed_origins.iter().filter(|o| o.as_str() != "*") {
        HeaderValue::from_str(origin).map_err(|_| {
            ValidationError::new("cors.allowedOrigins", format!("`{origin}` is not a valid origin"))
        })?;
    }
    for header in cors.allowed_headers.iter().filter(|h| h.as_str() != "*") {
        HeaderName::from_bytes(header.as_bytes()).map_err(|_| {
            ValidationError::new("cors.allowedHeaders", format!("`{header}` is not a valid header name"))
        })?;
    }
    for method in cors.allowed_methods.iter().filter(|m| m.as_str() != "*") {
        Method::from_bytes(method.as_bytes()).map_err(|_| {
            ValidationError::new("cors.allowedMethods", format!("`{method}` is not a valid method"))
        })?;
    }
    Ok(())
}

fn validate_forwarded_headers(config: &GatewayConfig) -> Result<(), ValidationError> {
    let fwd = &config.forwarded_headers;
    for proxy in &fwd.known_proxies {
        proxy.parse::<IpAddr>().map_err(|_| {
            ValidationError::new("forwardedHeaders.knownProxies", format!("`{proxy}` is not an IP address"))
        })?;
    }
    if fwd.forward_limit == 0 {
        return Err(ValidationError::new("forwardedHeaders.forwardLimit", "must be at least 1"));
    }
    Ok(())
}

fn validate_proxy(config: &GatewayConfig) -> Result<(), ValidationError> {
    let proxy = &config.proxy;
    if proxy.request_timeout_secs == 0 {
        return Err(ValidationError::new("proxy.requestTimeoutSecs", "must be greater than 0"));
    }

    let mut clusters = HashSet::new();
    for cluster in &proxy.clusters {
        if !clusters.insert(cluster.cluster_id.as_str()) {
            return Err(ValidationError::new(
                "proxy.clusters",
                format!("duplicate cluster `{}`", cluster.cluster_id),
            ));
        }
        let address = Url::parse(&cluster.address).map_err(|e| {
            ValidationError::new("proxy.clusters.address", format!("`{}`: {e}", cluster.address))
        })?;
        if address.scheme() != "http" {
            return Err(ValidationError::new(
                "proxy.clusters.address",
                format!("`{}` must be an http URL", cluster.address),
            ));
        }
    }

    let mut routes = HashSet::new();
    for route in &proxy.routes {
        if !routes.insert(route.route_id.as_str()) {
            return Err(ValidationError::new(
                "proxy.routes",
                format!("duplicate route `{}`", route.route_id),
            ));
        }
        if !route.path_prefix.starts_with('/') {
            return Err(ValidationError::new(
                "proxy.routes.pathPrefix",
                format!("`{}` must start with '/'", route.path_prefix),
            ));
        }
        if !clusters.contains(route.cluster_id.as_str()) {
            return Err(ValidationError::new(
                "proxy.routes.clusterId",
                format!("route `{}` references unknown cluster `{}`", route.route_id, route.cluster_id),
            ));
        }
    }
    Ok(())
}

fn validate_observability(config: &GatewayConfig) -> Result<(), ValidationError> {
    let observability = &config.observability;
    if !matches!(observability.log_format.to_ascii_lowercase().as_str(), "json" | "pretty") {
        return Err(ValidationError::new(
            "observability.logFormat",
            format!("`{}` is not one of `json`, `pretty`", observability.log_format),
        ));
    }
    if observability.metrics_enabled {
        observability
            .metrics_address
            .parse::<SocketAddr>()
            .map_err(|e| ValidationError::new("observability.metricsAddress", e.to_string()))?;
    }
    Ok(())
}
