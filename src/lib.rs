//! API gateway: authenticates, throttles, logs and forwards HTTP requests
//! to backend clusters.

pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod proxy;
pub mod security;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use http::{GatewayServer, GatewayState};
pub use lifecycle::Shutdown;
