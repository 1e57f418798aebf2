//! The seam between the gateway pipeline and the reverse-proxy engine.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::proxy::routes::RouteTable;

/// Failure reported by the proxy engine.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no route matches `{0}`")]
    NoRoute(String),

    #[error("route table has not been configured")]
    NotConfigured,

    #[error("upstream `{cluster}` unreachable: {reason}")]
    Unreachable { cluster: String, reason: String },

    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),

    #[error("cannot build upstream request: {0}")]
    InvalidRequest(String),
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::NoRoute(_) => StatusCode::NOT_FOUND,
            DispatchError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::Unreachable { .. } | DispatchError::InvalidRequest(_) => StatusCode::BAD_GATEWAY,
            DispatchError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// A missing route is the caller's problem; everything else is ours.
    pub fn is_server_fault(&self) -> bool {
        !matches!(self, DispatchError::NoRoute(_))
    }
}

/// Reverse-proxy engine consumed by the terminal pipeline stage.
///
/// The request it receives has already been rate limited, authenticated and
/// authorized. Route matching, upstream selection, health checking and
/// retries are entirely its concern.
pub trait Dispatcher: Send + Sync + 'static {
    /// Install the route table. Called once at startup.
    fn configure_routes(&self, routes: RouteTable) -> Result<(), DispatchError>;

    /// Forward one request and return the upstream response.
    fn dispatch(&self, request: Request<Body>) -> BoxFuture<'_, Result<Response, DispatchError>>;
}
