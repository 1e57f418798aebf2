//! Environment-selected authentication policy.

use axum::http::Method;
use jsonwebtoken::{Algorithm, Validation};

use crate::config::Environment;

/// How strictly bearer tokens and routes are checked.
///
/// Chosen once at startup; stages consult this value instead of the
/// environment name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPolicy {
    /// Issuer and audience validated; every route needs an identity.
    Strict,
    /// Issuer and audience not validated; the health route is open.
    Permissive,
}

impl AuthPolicy {
    pub fn from_environment(environment: &Environment) -> Self {
        if environment.is_development() {
            AuthPolicy::Permissive
        } else {
            AuthPolicy::Strict
        }
    }

    /// Token validation rules for a token signed with `algorithm`.
    pub fn validation(&self, algorithm: Algorithm, issuer: &str, audience: &str) -> Validation {
        let mut validation = Validation::new(algorithm);
        match self {
            AuthPolicy::Strict => {
                validation.set_issuer(&[issuer]);
                validation.set_audience(&[audience]);
            }
            AuthPolicy::Permissive => {
                validation.validate_aud = false;
            }
        }
        validation
    }

    /// Whether the request may proceed without an identity.
    pub fn is_exempt(&self, method: &Method, path: &str) -> bool {
        match self {
            AuthPolicy::Strict => false,
            AuthPolicy::Permissive => is_health_route(method, path),
        }
    }
}

pub fn is_health_route(method: &Method, path: &str) -> bool {
    method == Method::GET && path == "/"
}
