//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! gateway.toml (base)
//!     → gateway.<Environment>.toml (optional override)
//!     → GATEWAY__* environment variables
//!     → key=value command-line arguments
//!     → sources.rs (merge left to right)
//!     → loader.rs (deserialize)
//!     → validation.rs (semantic checks, first invalid field)
//!     → GatewayConfig (validated, immutable)
//!     → shared via Arc to all stages
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no reload
//! - All fields have defaults to allow minimal configs
//! - A validation failure is fatal at startup, never a per-request error

pub mod environment;
pub mod loader;
pub mod schema;
pub mod sources;
pub mod validation;

pub use environment::Environment;
pub use loader::{load_config, ConfigError};
pub use schema::{
    ClusterConfig, CorsConfig, ForwardedHeadersConfig, GatewayConfig, JwtConfig,
    ListenerConfig, ObservabilityConfig, ProxyConfig, RateLimitConfig, RouteConfig,
};
pub use sources::{standard_sources, ConfigSource};
