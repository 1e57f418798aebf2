//! CORS policy from configuration.
//!
//! `*` in any list means "any"; otherwise entries are matched literally.

use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

use crate::config::CorsConfig;

fn is_any(entries: &[String]) -> bool {
    entries.iter().any(|e| e.trim() == "*")
}

/// Build the CORS layer. Entries that do not parse are skipped; validation
/// has already rejected them at startup.
pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origins = if is_any(&config.allowed_origins) {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            config
                .allowed_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o.trim()).ok()),
        )
    };

    let methods = if is_any(&config.allowed_methods) {
        AllowMethods::any()
    } else {
        AllowMethods::list(
            config
                .allowed_methods
                .iter()
                .filter_map(|m| Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes()).ok()),
        )
    };

    let headers = if is_any(&config.allowed_headers) {
        AllowHeaders::any()
    } else {
        AllowHeaders::list(
            config
                .allowed_headers
                .iter()
                .filter_map(|h| HeaderName::from_bytes(h.trim().as_bytes()).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(headers)
}
