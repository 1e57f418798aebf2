//! Health route answered by the gateway itself.

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::http::server::GatewayState;

pub const HEALTH_MESSAGE: &str = "API Gateway is working!";

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub message: &'static str,
    pub timestamp: DateTime<Utc>,
    pub version: &'static str,
    pub environment: String,
}

pub async fn health(State(state): State<GatewayState>) -> Json<HealthReport> {
    Json(HealthReport {
        message: HEALTH_MESSAGE,
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION"),
        environment: state.environment.name().to_string(),
    })
}
