//! Analytics reports and export formats

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::metrics::CacheMetrics;
use crate::domain::DomainError;

const LOW_HIT_RATE: f64 = 0.5;
const HIGH_HIT_RATE: f64 = 0.95;
const HIGH_P95_LATENCY_MS: f64 = 100.0;
const HIGH_EVICTION_RATE: f64 = 0.1;

/// What the cache saved compared to recomputing every request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostAnalysis {
    pub cost_per_hit: f64,
    pub cost_per_miss: f64,
    pub cost_without_cache: f64,
    pub actual_cost: f64,
    pub savings: f64,
    /// Savings as a fraction of `cost_without_cache`
    pub savings_ratio: f64,
}

impl CostAnalysis {
    pub fn compute(hits: u64, misses: u64, cost_per_hit: f64, cost_per_miss: f64) -> Self {
        let cost_without_cache = (hits + misses) as f64 * cost_per_miss;
        let actual_cost = hits as f64 * cost_per_hit + misses as f64 * cost_per_miss;
        let savings = cost_without_cache - actual_cost;

        Self {
            cost_per_hit,
            cost_per_miss,
            cost_without_cache,
            actual_cost,
            savings,
            savings_ratio: if cost_without_cache > 0.0 {
                savings / cost_without_cache
            } else {
                0.0
            },
        }
    }
}

/// Change of one cache against the previous window of equal length
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendDelta {
    pub cache_name: String,
    pub hit_rate_delta: f64,
    pub avg_latency_delta_ms: f64,
    pub request_delta: i64,
}

impl TrendDelta {
    pub fn between(current: &CacheMetrics, previous: &CacheMetrics) -> Self {
        Self {
            cache_name: current.cache_name.clone(),
            hit_rate_delta: current.hit_rate - previous.hit_rate,
            avg_latency_delta_ms: current.avg_latency_ms - previous.avg_latency_ms,
            request_delta: current.total_requests as i64 - previous.total_requests as i64,
        }
    }
}

/// One row of the tabular export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub cache_name: String,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub entry_count: Option<usize>,
}

impl From<&CacheMetrics> for ReportRow {
    fn from(metrics: &CacheMetrics) -> Self {
        Self {
            cache_name: metrics.cache_name.clone(),
            hits: metrics.hits,
            misses: metrics.misses,
            hit_rate: metrics.hit_rate,
            avg_latency_ms: metrics.avg_latency_ms,
            p95_latency_ms: metrics.p95_latency_ms,
            entry_count: metrics.entry_count,
        }
    }
}

/// Aggregated report across caches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheReport {
    pub generated_at: DateTime<Utc>,
    pub timeframe_secs: u64,
    pub caches: Vec<CacheMetrics>,
    pub totals: CacheMetrics,
    /// Hits per miss; `None` when there were no misses
    pub hit_miss_ratio: Option<f64>,
    pub cost: CostAnalysis,
    pub trends: Vec<TrendDelta>,
    pub recommendations: Vec<String>,
}

impl CacheReport {
    pub fn to_json(&self) -> Result<String, DomainError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| DomainError::serialization(format!("Failed to export report: {}", e)))
    }

    pub fn to_rows(&self) -> Vec<ReportRow> {
        self.caches.iter().map(ReportRow::from).collect()
    }

    pub fn to_csv(&self) -> String {
        let mut out =
            String::from("cache_name,hits,misses,hit_rate,avg_latency_ms,p95_latency_ms,entry_count\n");

        for row in self.to_rows() {
            let _ = writeln!(
                out,
                "{},{},{},{:.4},{:.3},{:.3},{}",
                csv_field(&row.cache_name),
                row.hits,
                row.misses,
                row.hit_rate,
                row.avg_latency_ms,
                row.p95_latency_ms,
                row.entry_count.map(|c| c.to_string()).unwrap_or_default()
            );
        }

        out
    }

    /// Plain-text exposition format for scrape-based monitoring
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        let gauges: [(&str, &str, fn(&CacheMetrics) -> f64); 8] = [
            ("cache_hits", "Cache hits in the report window", |m| m.hits as f64),
            ("cache_misses", "Cache misses in the report window", |m| m.misses as f64),
            ("cache_evictions", "Cache evictions in the report window", |m| m.evictions as f64),
            ("cache_errors", "Cache errors in the report window", |m| m.errors as f64),
            ("cache_hit_rate", "Hit rate in the report window", |m| m.hit_rate),
            ("cache_latency_avg_ms", "Average operation latency", |m| m.avg_latency_ms),
            ("cache_latency_p95_ms", "95th percentile operation latency", |m| m.p95_latency_ms),
            ("cache_entries", "Entries held in memory", |m| {
                m.entry_count.unwrap_or_default() as f64
            }),
        ];

        for (name, help, value) in gauges {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} gauge", name);

            for metrics in &self.caches {
                let _ = writeln!(
                    out,
                    "{}{{cache=\"{}\"}} {}",
                    name,
                    escape_label(&metrics.cache_name),
                    value(metrics)
                );
            }
        }

        let _ = writeln!(out, "# HELP cache_cost_savings Estimated savings in the report window");
        let _ = writeln!(out, "# TYPE cache_cost_savings gauge");
        let _ = writeln!(out, "cache_cost_savings {}", self.cost.savings);

        out
    }
}

/// Fixed heuristics over one cache's snapshot
pub fn recommendations_for(metrics: &CacheMetrics) -> Vec<String> {
    let mut out = Vec::new();
    let name = &metrics.cache_name;

    if metrics.total_requests > 0 && metrics.hit_rate < LOW_HIT_RATE {
        out.push(format!(
            "{}: hit rate {:.1}% is below 50%; consider a longer TTL or a lower similarity threshold",
            name,
            metrics.hit_rate * 100.0
        ));
    }

    if metrics.total_requests > 0 && metrics.hit_rate > HIGH_HIT_RATE {
        out.push(format!(
            "{}: hit rate {:.1}% is above 95%; the cache may be oversized",
            name,
            metrics.hit_rate * 100.0
        ));
    }

    if metrics.latency_samples > 0 && metrics.p95_latency_ms > HIGH_P95_LATENCY_MS {
        out.push(format!(
            "{}: p95 latency {:.1}ms exceeds 100ms; optimize the remote tier",
            name, metrics.p95_latency_ms
        ));
    }

    if metrics.eviction_rate() > HIGH_EVICTION_RATE {
        out.push(format!(
            "{}: evictions are {:.1}% of operations; increase capacity",
            name,
            metrics.eviction_rate() * 100.0
        ));
    }

    out
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(name: &str, hits: u64, misses: u64) -> CacheMetrics {
        let total = hits + misses;
        CacheMetrics {
            cache_name: name.to_string(),
            hits,
            misses,
            total_requests: total,
            hit_rate: if total > 0 { hits as f64 / total as f64 } else { 0.0 },
            miss_rate: if total > 0 { misses as f64 / total as f64 } else { 0.0 },
            entry_count: Some(3),
            ..Default::default()
        }
    }

    fn report(caches: Vec<CacheMetrics>) -> CacheReport {
        CacheReport {
            generated_at: Utc::now(),
            timeframe_secs: 3600,
            totals: CacheMetrics::default(),
            hit_miss_ratio: None,
            cost: CostAnalysis::compute(10, 5, 0.0001, 0.01),
            trends: Vec::new(),
            recommendations: Vec::new(),
            caches,
        }
    }

    #[test]
    fn test_cost_savings_non_negative() {
        let cost = CostAnalysis::compute(80, 20, 0.0001, 0.01);

        assert!((cost.cost_without_cache - 1.0).abs() < 1e-12);
        assert!((cost.actual_cost - 0.208).abs() < 1e-12);
        assert!(cost.savings >= 0.0);
        assert!((cost.savings - 0.792).abs() < 1e-12);
    }

    #[test]
    fn test_cost_with_no_traffic() {
        let cost = CostAnalysis::compute(0, 0, 0.0001, 0.01);
        assert_eq!(cost.savings, 0.0);
        assert_eq!(cost.savings_ratio, 0.0);
    }

    #[test]
    fn test_trend_delta() {
        let delta = TrendDelta::between(&metrics("c", 9, 1), &metrics("c", 5, 5));

        assert!((delta.hit_rate_delta - 0.4).abs() < 1e-12);
        assert_eq!(delta.request_delta, 0);
    }

    #[test]
    fn test_recommendations() {
        let low = recommendations_for(&metrics("low", 1, 9));
        assert_eq!(low.len(), 1);
        assert!(low[0].contains("longer TTL"));

        let high = recommendations_for(&metrics("high", 99, 1));
        assert!(high[0].contains("oversized"));

        let mut slow = metrics("slow", 7, 3);
        slow.latency_samples = 10;
        slow.p95_latency_ms = 250.0;
        slow.evictions = 5;
        let slow = recommendations_for(&slow);
        assert_eq!(slow.len(), 2);

        assert!(recommendations_for(&metrics("idle", 0, 0)).is_empty());
    }

    #[test]
    fn test_csv_export() {
        let csv = report(vec![metrics("semantic", 3, 1)]).to_csv();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("cache_name,hits"));
        assert_eq!(lines[1], "semantic,3,1,0.7500,0.000,0.000,3");
    }

    #[test]
    fn test_prometheus_export() {
        let text = report(vec![metrics("semantic", 3, 1), metrics("query", 0, 2)]).to_prometheus();

        assert!(text.contains("# HELP cache_hits "));
        assert!(text.contains("# TYPE cache_hits gauge"));
        assert!(text.contains("cache_hits{cache=\"semantic\"} 3"));
        assert!(text.contains("cache_misses{cache=\"query\"} 2"));
        assert!(text.contains("cache_hit_rate{cache=\"semantic\"} 0.75"));
        assert!(text.contains("cache_cost_savings "));
    }

    #[test]
    fn test_json_export() {
        let json = report(vec![metrics("semantic", 3, 1)]).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["caches"][0]["cache_name"], "semantic");
        assert_eq!(value["timeframe_secs"], 3600);
    }
}
