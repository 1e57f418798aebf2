//! Pipeline composition.
//!
//! # Stage Order (outermost first)
//! ```text
//! 0. CatchPanic + request id   generic 500 on panic, x-request-id in and out
//! 1. Request logging           sees every outcome, including short-circuits
//! 2. Forwarded headers         resolve ClientAddr before anything keys on it
//! 3. CORS                      answer preflight, decorate responses
//! 4. Compression               negotiated per request, applied on the way out
//! 5. Rate limiting             cheapest rejection, before token crypto
//! 6. Authentication            invalid bearer token → 401
//! 7. Authorization             no identity → 401, missing scope → 403
//! 8. Terminal                  GET / health locally, everything else dispatched
//! ```
//!
//! Any stage may answer on its own; the response then travels back out
//! through the stages above it only.

use std::any::Any;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::Response as HttpResponse;
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::{CompressionBody, CompressionLayer};
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

use crate::auth::{authenticate_middleware, authorize_middleware};
use crate::error::GatewayError;
use crate::http::health::health;
use crate::http::request::{UuidRequestId, X_REQUEST_ID};
use crate::http::server::GatewayState;
use crate::observability::request_log::RequestLoggingLayer;
use crate::security::{cors_layer, forwarded_headers_middleware, rate_limit_middleware};

/// Build the gateway router with every stage in its fixed position.
pub fn build_router(state: GatewayState) -> Router {
    let stages = ServiceBuilder::new()
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(SetRequestIdLayer::new(X_REQUEST_ID, UuidRequestId))
        .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
        .layer(RequestLoggingLayer)
        .layer(from_fn_with_state(state.forwarded.clone(), forwarded_headers_middleware))
        .layer(cors_layer(&state.config.cors))
        .map_response(|response: HttpResponse<CompressionBody<Body>>| response.into_response())
        .layer(CompressionLayer::new())
        .layer(from_fn_with_state(state.limiter.clone(), rate_limit_middleware))
        .layer(from_fn_with_state(state.auth.clone(), authenticate_middleware))
        .layer(from_fn_with_state(state.auth.clone(), authorize_middleware));

    Router::new()
        .route("/", get(health).fallback(dispatch))
        .fallback(dispatch)
        .layer(stages)
        .with_state(state)
}

/// Terminal stage: hand the request to the proxy engine.
async fn dispatch(State(state): State<GatewayState>, request: Request) -> Result<Response, GatewayError> {
    state.dispatcher.dispatch(request).await.map_err(GatewayError::from)
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    tracing::error!(panic = %detail, "Request handler panicked");
    GatewayError::Internal.into_response()
}
