//! Windowed cache metrics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::{CacheEvent, CacheEventKind};

/// Snapshot of one cache (or all caches) over a time window
///
/// Always recomputed from the event log, never updated incrementally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub cache_name: String,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub errors: u64,
    pub deduplications: u64,
    /// Hits plus misses
    pub total_requests: u64,
    pub hit_rate: f64,
    pub miss_rate: f64,
    /// Errors over all hit, miss and error events
    pub error_rate: f64,
    pub avg_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub latency_samples: usize,
    /// Last reported in-memory size
    pub entry_count: Option<usize>,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
}

impl CacheMetrics {
    /// Folds `events` into a snapshot, keeping the most recent
    /// `max_latency_samples` latencies for the percentiles
    pub fn compute<'a>(
        cache_name: impl Into<String>,
        events: impl IntoIterator<Item = &'a CacheEvent>,
        max_latency_samples: usize,
    ) -> Self {
        let mut metrics = CacheMetrics {
            cache_name: cache_name.into(),
            ..Default::default()
        };
        let mut latencies = Vec::new();

        for event in events {
            match event.kind {
                CacheEventKind::Hit => metrics.hits += 1,
                CacheEventKind::Miss => metrics.misses += 1,
                CacheEventKind::Eviction => metrics.evictions += 1,
                CacheEventKind::Error => metrics.errors += 1,
                CacheEventKind::Expiration => metrics.expirations += 1,
                CacheEventKind::Deduplication => metrics.deduplications += 1,
            }

            if let Some(latency) = event.latency_ms {
                latencies.push(latency);
            }
        }

        metrics.total_requests = metrics.hits + metrics.misses;

        if metrics.total_requests > 0 {
            metrics.hit_rate = metrics.hits as f64 / metrics.total_requests as f64;
            metrics.miss_rate = 1.0 - metrics.hit_rate;
        }

        let operations = metrics.total_requests + metrics.errors;
        if operations > 0 {
            metrics.error_rate = metrics.errors as f64 / operations as f64;
        }

        if latencies.len() > max_latency_samples {
            latencies.drain(..latencies.len() - max_latency_samples);
        }

        metrics.apply_latencies(latencies);
        metrics
    }

    pub fn with_window(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.window_start = Some(start);
        self.window_end = Some(end);
        self
    }

    pub fn with_entry_count(mut self, entry_count: Option<usize>) -> Self {
        self.entry_count = entry_count;
        self
    }

    /// Evictions as a fraction of every recorded operation
    pub fn eviction_rate(&self) -> f64 {
        let operations = self.total_requests + self.evictions;

        if operations == 0 {
            return 0.0;
        }

        self.evictions as f64 / operations as f64
    }

    fn apply_latencies(&mut self, mut latencies: Vec<f64>) {
        self.latency_samples = latencies.len();

        if latencies.is_empty() {
            return;
        }

        self.avg_latency_ms = latencies.iter().sum::<f64>() / latencies.len() as f64;

        latencies.sort_by(|a, b| a.total_cmp(b));
        self.p50_latency_ms = percentile(&latencies, 50.0);
        self.p95_latency_ms = percentile(&latencies, 95.0);
        self.p99_latency_ms = percentile(&latencies, 99.0);
    }
}

/// Nearest-rank percentile over sorted samples
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }

    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn event(kind: CacheEventKind, latency_ms: Option<u64>) -> CacheEvent {
        let event = CacheEvent::new("c", kind);
        match latency_ms {
            Some(ms) => event.with_latency(Duration::from_millis(ms)),
            None => event,
        }
    }

    #[test]
    fn test_rates_sum_to_one() {
        let events = vec![
            event(CacheEventKind::Hit, None),
            event(CacheEventKind::Hit, None),
            event(CacheEventKind::Miss, None),
            event(CacheEventKind::Eviction, None),
        ];

        let metrics = CacheMetrics::compute("c", &events, 100);

        assert_eq!(metrics.total_requests, 3);
        assert!((metrics.hit_rate + metrics.miss_rate - 1.0).abs() < 1e-12);
        assert!((metrics.hit_rate - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(metrics.evictions, 1);
        assert!((metrics.eviction_rate() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_empty_window() {
        let metrics = CacheMetrics::compute("c", &[], 100);

        assert_eq!(metrics.total_requests, 0);
        assert_eq!(metrics.hit_rate, 0.0);
        assert_eq!(metrics.miss_rate, 0.0);
        assert_eq!(metrics.p95_latency_ms, 0.0);
    }

    #[test]
    fn test_percentiles_nearest_rank() {
        let events: Vec<_> = (1..=100)
            .map(|ms| event(CacheEventKind::Hit, Some(ms)))
            .collect();

        let metrics = CacheMetrics::compute("c", &events, 1000);

        assert!((metrics.p50_latency_ms - 50.0).abs() < 1e-9);
        assert!((metrics.p95_latency_ms - 95.0).abs() < 1e-9);
        assert!((metrics.p99_latency_ms - 99.0).abs() < 1e-9);
        assert!((metrics.avg_latency_ms - 50.5).abs() < 1e-9);
    }

    #[test]
    fn test_latency_window_keeps_most_recent() {
        let mut events: Vec<_> = (0..10).map(|_| event(CacheEventKind::Hit, Some(500))).collect();
        events.extend((0..5).map(|_| event(CacheEventKind::Hit, Some(1))));

        let metrics = CacheMetrics::compute("c", &events, 5);

        assert_eq!(metrics.latency_samples, 5);
        assert!((metrics.avg_latency_ms - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_error_rate() {
        let events = vec![
            event(CacheEventKind::Hit, None),
            event(CacheEventKind::Error, None),
            event(CacheEventKind::Miss, None),
            event(CacheEventKind::Miss, None),
        ];

        let metrics = CacheMetrics::compute("c", &events, 10);
        assert!((metrics.error_rate - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_percentile_small_sets() {
        assert_eq!(percentile(&[], 95.0), 0.0);
        assert_eq!(percentile(&[7.0], 50.0), 7.0);
        assert_eq!(percentile(&[1.0, 2.0], 0.0), 1.0);
        assert_eq!(percentile(&[1.0, 2.0], 100.0), 2.0);
    }
}
