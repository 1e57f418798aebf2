//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!     → request_log.rs (one event per request, body captured and replayed)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through all log events of a request
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
pub mod request_log;

pub use logging::init_logging;
pub use request_log::RequestLoggingLayer;
