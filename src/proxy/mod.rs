//! Reverse-proxy engine boundary.
//!
//! # Data Flow
//! ```text
//! Authorized request (terminal pipeline stage)
//!     → dispatcher.rs (Dispatcher trait)
//!     → upstream.rs (route lookup, URI rewrite, forward)
//!     → routes.rs (longest path prefix → cluster base URL)
//!     → Upstream response streamed back out
//! ```
//!
//! # Design Decisions
//! - The pipeline only sees the `Dispatcher` trait
//! - Route table is installed once and read lock-free afterwards

pub mod dispatcher;
pub mod routes;
pub mod upstream;

pub use dispatcher::{DispatchError, Dispatcher};
pub use routes::{Route, RouteTable};
pub use upstream::UpstreamDispatcher;
