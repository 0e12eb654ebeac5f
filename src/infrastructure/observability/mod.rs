//! Observability infrastructure: Prometheus metrics

mod config;
mod metrics;

pub use config::MetricsConfig;
pub use metrics::{
    create_metrics_router, init_metrics, record_alert, record_cache_entries, record_cache_event,
    PrometheusMetrics,
};
