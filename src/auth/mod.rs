//! Authentication and authorization.
//!
//! # Data Flow
//! ```text
//! Environment name (startup)
//!     → policy.rs (AuthPolicy: Strict | Permissive)
//!
//! Request:
//!     → middleware.rs authenticate (bearer token → token.rs validator)
//!         → discovery.rs (signing keys from the authority)
//!     → middleware.rs authorize (identity present, scopes held)
//! ```
//!
//! # Design Decisions
//! - The policy is a value injected into both stages, not an environment
//!   check inside them
//! - Token verification sits behind `TokenValidator` so tests and local
//!   setups can use a fixed key

pub mod discovery;
pub mod middleware;
pub mod policy;
pub mod token;

use std::sync::Arc;

pub use discovery::KeyCache;
pub use middleware::{authenticate_middleware, authorize_middleware, AuthState};
pub use policy::AuthPolicy;
pub use token::{AuthError, Identity, JwtValidator, StaticKeyValidator, TokenValidator};

use crate::config::JwtConfig;

/// Validator backed by the configured authority's published keys.
pub fn validator_from_config(config: &JwtConfig, policy: AuthPolicy) -> Result<Arc<dyn TokenValidator>, AuthError> {
    let keys = Arc::new(KeyCache::new(&config.authority, config.require_https)?);
    tracing::info!(metadata = %keys.metadata_url(), ?policy, "Token validation configured");
    Ok(Arc::new(JwtValidator::new(keys, policy, config.audience.clone())))
}
