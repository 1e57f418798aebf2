//! Per-request error taxonomy and its HTTP mapping.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::proxy::DispatchError;

/// A request-level rejection or failure.
///
/// Stage-local rejections (throttling, authentication, authorization) are
/// client errors; upstream failures and `Internal` are server faults.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("rate limit exceeded, retry after {}s", retry_after_secs(.retry_after))]
    Throttled { retry_after: Duration },

    #[error("authentication required: {0}")]
    Unauthenticated(String),

    #[error("access denied: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("internal error")]
    Internal,
}

/// Attached to responses produced from a server-side failure so the request
/// logger can report the cause without parsing the body.
#[derive(Debug, Clone)]
pub struct FailureCause(pub Arc<GatewayError>);

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Throttled { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::Dispatch(e) => e.status(),
            GatewayError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            GatewayError::Throttled { .. } => "rate_limited",
            GatewayError::Unauthenticated(_) => "unauthorized",
            GatewayError::Forbidden(_) => "forbidden",
            GatewayError::Dispatch(_) => "upstream_error",
            GatewayError::Internal => "internal_error",
        }
    }

    /// Whether this is a gateway or upstream fault rather than a client error.
    pub fn is_server_fault(&self) -> bool {
        match self {
            GatewayError::Dispatch(e) => e.is_server_fault(),
            GatewayError::Internal => true,
            _ => false,
        }
    }
}

fn retry_after_secs(retry_after: &Duration) -> u64 {
    // Whole seconds, rounded up, at least 1
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs.max(1)
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Server faults never leak internal detail to the client
        let message = if self.is_server_fault() {
            status
                .canonical_reason()
                .unwrap_or("Upstream failure")
                .to_string()
        } else {
            self.to_string()
        };

        let mut response = (
            status,
            Json(json!({ "error": self.code(), "message": message })),
        )
            .into_response();

        match &self {
            GatewayError::Throttled { retry_after } => {
                response.headers_mut().insert(
                    header::RETRY_AFTER,
                    HeaderValue::from(retry_after_secs(retry_after)),
                );
            }
            GatewayError::Unauthenticated(_) => {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            GatewayError::Forbidden(_) => {
                response.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Bearer error=\"insufficient_scope\""),
                );
            }
            _ => {}
        }

        if self.is_server_fault() {
            response.extensions_mut().insert(FailureCause(Arc::new(self)));
        }
        response
    }
}
