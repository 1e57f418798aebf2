//! Authentication and authorization stages.
//!
//! Authentication attaches an `Identity` when a valid bearer token is
//! present and rejects invalid ones. Requests without a token continue
//! anonymously; authorization decides whether that is acceptable.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::auth::policy::AuthPolicy;
use crate::auth::token::{Identity, TokenValidator};
use crate::error::GatewayError;
use crate::observability::metrics;

/// Shared state of both auth stages.
#[derive(Clone)]
pub struct AuthState {
    pub policy: AuthPolicy,
    pub validator: Arc<dyn TokenValidator>,
    pub required_scopes: Arc<[String]>,
}

impl AuthState {
    pub fn new(policy: AuthPolicy, validator: Arc<dyn TokenValidator>, required_scopes: Vec<String>) -> Self {
        Self {
            policy,
            validator,
            required_scopes: required_scopes.into(),
        }
    }
}

/// The token of an `Authorization: Bearer` header. Other schemes are ignored.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

pub async fn authenticate_middleware(
    State(auth): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(request.headers()) else {
        return next.run(request).await;
    };

    let outcome = auth.validator.validate(token).await;
    match outcome {
        Ok(identity) => {
            tracing::debug!(subject = %identity.subject, "Bearer token accepted");
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(err) => {
            if err.is_provider_failure() {
                tracing::warn!(path = %request.uri().path(), error = %err, "Identity provider unavailable");
            } else {
                tracing::info!(path = %request.uri().path(), error = %err, "Bearer token rejected");
            }
            metrics::record_auth_rejection(err.reason());
            GatewayError::Unauthenticated("invalid bearer token".to_string()).into_response()
        }
    }
}

pub async fn authorize_middleware(
    State(auth): State<AuthState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if auth.policy.is_exempt(request.method(), request.uri().path()) {
        return next.run(request).await;
    }

    let Some(identity) = request.extensions().get::<Identity>() else {
        tracing::info!(path = %request.uri().path(), "Request without identity refused");
        metrics::record_auth_rejection("missing_identity");
        return GatewayError::Unauthenticated("bearer token required".to_string()).into_response();
    };

    if let Some(missing) = auth.required_scopes.iter().find(|s| !identity.has_scope(s)) {
        tracing::info!(
            subject = %identity.subject,
            path = %request.uri().path(),
            scope = %missing,
            "Identity lacks required scope"
        );
        metrics::record_auth_rejection("missing_scope");
        return GatewayError::Forbidden(format!("scope `{missing}` required")).into_response();
    }

    next.run(request).await
}
