//! Cache statistics and analytics report endpoints

use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use super::state::AppState;
use crate::domain::query_cache::QueryCacheStats;
use crate::domain::semantic_cache::SemanticCacheStats;

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub semantic: SemanticCacheStats,
    pub query: QueryCacheStats,
}

pub async fn cache_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        semantic: state.semantic.stats().await,
        query: state.query.stats().await,
    })
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Json,
    Csv,
    Prometheus,
}

#[derive(Debug, Deserialize)]
pub struct ReportParams {
    #[serde(default)]
    pub format: ReportFormat,
    pub timeframe_secs: Option<u64>,
    /// Comma-separated cache names; every cache when absent
    pub caches: Option<String>,
}

impl ReportParams {
    fn cache_names(&self) -> Option<Vec<String>> {
        self.caches.as_ref().map(|caches| {
            caches
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(String::from)
                .collect()
        })
    }
}

pub async fn analytics_report(
    State(state): State<AppState>,
    Query(params): Query<ReportParams>,
) -> Response {
    let cache_names = params.cache_names();
    let report = state.analytics.generate_report(
        cache_names.as_deref(),
        params.timeframe_secs.map(Duration::from_secs),
    );

    match params.format {
        ReportFormat::Json => match report.to_json() {
            Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
            Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
        },
        ReportFormat::Csv => ([(header::CONTENT_TYPE, "text/csv")], report.to_csv()).into_response(),
        ReportFormat::Prometheus => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            report.to_prometheus(),
        )
            .into_response(),
    }
}
