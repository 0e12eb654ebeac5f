//! Prometheus metrics infrastructure

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Router};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use super::config::MetricsConfig;
use crate::domain::analytics::{Alert, CacheEvent};
use crate::infrastructure::services::CacheAnalytics;

/// Prometheus metrics handle for serving metrics endpoint
#[derive(Clone)]
pub struct PrometheusMetrics {
    handle: Arc<PrometheusHandle>,
}

impl PrometheusMetrics {
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Installs the global Prometheus recorder; `None` when disabled or when a
/// recorder is already installed
pub fn init_metrics(config: &MetricsConfig) -> Option<PrometheusMetrics> {
    if !config.enabled {
        tracing::info!("Prometheus metrics disabled");
        return None;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            gauge!("result_cache_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);

            tracing::info!(path = %config.path, "Prometheus metrics initialized");

            Some(PrometheusMetrics {
                handle: Arc::new(handle),
            })
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize Prometheus metrics");
            None
        }
    }
}

#[derive(Clone)]
struct MetricsState {
    metrics: PrometheusMetrics,
    analytics: Arc<CacheAnalytics>,
}

/// Serves the recorder output followed by the analytics report exposition
pub fn create_metrics_router(
    config: &MetricsConfig,
    metrics: PrometheusMetrics,
    analytics: Arc<CacheAnalytics>,
) -> Router {
    Router::new()
        .route(&config.path, get(metrics_handler))
        .with_state(MetricsState { metrics, analytics })
}

async fn metrics_handler(State(state): State<MetricsState>) -> impl IntoResponse {
    let mut body = state.metrics.render();
    body.push_str(&state.analytics.generate_report(None, None).to_prometheus());
    body
}

/// Emits one cache event through the metrics facade
pub fn record_cache_event(event: &CacheEvent) {
    let labels = [
        ("cache", event.cache_name.clone()),
        ("kind", event.kind.as_str().to_string()),
    ];

    counter!("cache_events_total", &labels).increment(1);

    if let Some(latency_ms) = event.latency_ms {
        histogram!("cache_operation_duration_seconds", &labels).record(latency_ms / 1000.0);
    }
}

pub fn record_cache_entries(cache_name: &str, entries: usize) {
    gauge!("cache_memory_entries", "cache" => cache_name.to_string()).set(entries as f64);
}

pub fn record_alert(alert: &Alert) {
    counter!(
        "cache_alerts_total",
        "cache" => alert.cache_name.clone(),
        "rule" => alert.rule_name.clone()
    )
    .increment(1);
}
