//! Health check endpoints

use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use super::state::AppState;
use crate::domain::{HealthReport, HealthStatus};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub version: String,
    pub latency_ms: u64,
    #[serde(flatten)]
    pub report: HealthReport,
}

/// Merged report of the store and both caches
///
/// A degraded cache still serves from memory, so only `unhealthy` maps to 503.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let start = Instant::now();

    let report = HealthReport::healthy()
        .merge("store", state.store.health_check().await)
        .merge("semantic", state.semantic.health().await)
        .merge("query", state.query.health().await);

    let status_code = match report.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    let response = HealthResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        latency_ms: start.elapsed().as_millis() as u64,
        report,
    };

    (status_code, Json(response))
}

/// Liveness probe
pub async fn live_check() -> impl IntoResponse {
    StatusCode::OK
}
