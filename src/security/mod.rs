//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → headers.rs (resolve client from trusted X-Forwarded-*)
//!     → cors.rs (preflight, response headers)
//!     → rate_limit.rs (fixed window per client address)
//!     → auth (bearer token, authorization)
//! ```
//!
//! # Design Decisions
//! - No trust in forwarded headers from unknown peers
//! - Cheapest rejection first: throttling runs before token validation

pub mod cors;
pub mod headers;
pub mod rate_limit;

pub use cors::cors_layer;
pub use headers::{forwarded_headers_middleware, ClientAddr, ForwardedHeaders};
pub use rate_limit::{rate_limit_middleware, RateLimiter};
