//! Cache analytics domain: events, windowed metrics, alerts and reports

mod alert;
mod config;
mod event;
mod metrics;
mod report;

pub use alert::{Alert, AlertCallback, AlertCondition, AlertRule, AlertSeverity};
pub use config::AnalyticsConfig;
pub use event::{CacheEvent, CacheEventKind, CacheEventSink};
pub use metrics::{percentile, CacheMetrics};
pub use report::{recommendations_for, CacheReport, CostAnalysis, ReportRow, TrendDelta};
