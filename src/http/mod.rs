//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (peer address captured)
//!     → server.rs (axum serve, graceful shutdown)
//!     → pipeline.rs (fixed stage order)
//!     → request.rs (request id)
//!     → health.rs (GET /) or the proxy dispatcher
//!     → Send to client
//! ```

pub mod health;
pub mod pipeline;
pub mod request;
pub mod server;

pub use pipeline::build_router;
pub use request::{UuidRequestId, X_REQUEST_ID};
pub use server::{GatewayServer, GatewayState};
