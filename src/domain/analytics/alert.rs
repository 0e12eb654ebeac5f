//! Threshold alert rules

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::metrics::CacheMetrics;
use crate::domain::DomainError;

/// Threshold a rule watches
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "threshold", rename_all = "snake_case")]
pub enum AlertCondition {
    /// Fires when the hit rate drops below the threshold
    MinHitRate(f64),
    /// Fires when p95 latency in milliseconds exceeds the threshold
    MaxLatencyMs(f64),
    /// Fires when the error rate exceeds the threshold
    MaxErrorRate(f64),
}

impl AlertCondition {
    pub fn default_name(&self) -> &'static str {
        match self {
            Self::MinHitRate(_) => "min_hit_rate",
            Self::MaxLatencyMs(_) => "max_latency_ms",
            Self::MaxErrorRate(_) => "max_error_rate",
        }
    }

    pub fn threshold(&self) -> f64 {
        match self {
            Self::MinHitRate(t) | Self::MaxLatencyMs(t) | Self::MaxErrorRate(t) => *t,
        }
    }

    /// Value this condition reads from a snapshot
    pub fn observe(&self, metrics: &CacheMetrics) -> f64 {
        match self {
            Self::MinHitRate(_) => metrics.hit_rate,
            Self::MaxLatencyMs(_) => metrics.p95_latency_ms,
            Self::MaxErrorRate(_) => metrics.error_rate,
        }
    }

    pub fn is_breached(&self, metrics: &CacheMetrics) -> bool {
        let observed = self.observe(metrics);

        match self {
            Self::MinHitRate(t) => observed < *t,
            Self::MaxLatencyMs(t) | Self::MaxErrorRate(t) => observed > *t,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    #[default]
    Warning,
    Critical,
}

/// A rule plus its firing state
#[derive(Debug, Clone, Serialize)]
pub struct AlertRule {
    name: String,
    condition: AlertCondition,
    /// Restricts the rule to one cache; `None` evaluates every cache
    cache_name: Option<String>,
    severity: AlertSeverity,
    cooldown: Duration,
    window: Duration,
    min_requests: u64,
    active: bool,
    trigger_count: u64,
    last_triggered: Option<DateTime<Utc>>,
}

impl AlertRule {
    pub fn new(name: impl Into<String>, condition: AlertCondition) -> Self {
        Self {
            name: name.into(),
            condition,
            cache_name: None,
            severity: AlertSeverity::default(),
            cooldown: Duration::from_secs(300),
            window: Duration::from_secs(300),
            min_requests: 1,
            active: false,
            trigger_count: 0,
            last_triggered: None,
        }
    }

    pub fn for_cache(mut self, cache_name: impl Into<String>) -> Self {
        self.cache_name = Some(cache_name.into());
        self
    }

    pub fn with_severity(mut self, severity: AlertSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_min_requests(mut self, min_requests: u64) -> Self {
        self.min_requests = min_requests;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn condition(&self) -> AlertCondition {
        self.condition
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn trigger_count(&self) -> u64 {
        self.trigger_count
    }

    pub fn last_triggered(&self) -> Option<DateTime<Utc>> {
        self.last_triggered
    }

    pub fn applies_to(&self, cache_name: &str) -> bool {
        self.cache_name
            .as_deref()
            .is_none_or(|name| name == cache_name)
    }

    fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.last_triggered.is_some_and(|last| {
            (now - last).to_std().unwrap_or(Duration::ZERO) < self.cooldown
        })
    }

    /// Updates the rule state from a snapshot; returns an alert only when a
    /// notification should go out
    pub fn evaluate(&mut self, metrics: &CacheMetrics, now: DateTime<Utc>) -> Option<Alert> {
        let has_data = match self.condition {
            AlertCondition::MaxLatencyMs(_) => metrics.latency_samples > 0,
            _ => metrics.total_requests >= self.min_requests.max(1),
        };

        if !has_data || !self.condition.is_breached(metrics) {
            self.active = false;
            return None;
        }

        self.active = true;

        if self.in_cooldown(now) {
            return None;
        }

        self.trigger_count += 1;
        self.last_triggered = Some(now);

        let observed = self.condition.observe(metrics);

        Some(Alert {
            rule_name: self.name.clone(),
            cache_name: metrics.cache_name.clone(),
            condition: self.condition,
            severity: self.severity,
            observed_value: observed,
            threshold: self.condition.threshold(),
            message: format!(
                "{} breached for cache '{}': observed {:.4}, threshold {:.4}",
                self.name,
                metrics.cache_name,
                observed,
                self.condition.threshold()
            ),
            triggered_at: now,
        })
    }
}

/// A fired alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub rule_name: String,
    pub cache_name: String,
    pub condition: AlertCondition,
    pub severity: AlertSeverity,
    pub observed_value: f64,
    pub threshold: f64,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
}

/// Receives fired alerts (chat-ops, paging, logs)
///
/// Errors are logged by the caller and never reach the cache path.
#[async_trait]
pub trait AlertCallback: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<(), DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(hits: u64, misses: u64) -> CacheMetrics {
        let total = hits + misses;
        let hit_rate = if total > 0 { hits as f64 / total as f64 } else { 0.0 };

        CacheMetrics {
            cache_name: "semantic".to_string(),
            hits,
            misses,
            total_requests: total,
            hit_rate,
            miss_rate: if total > 0 { 1.0 - hit_rate } else { 0.0 },
            ..Default::default()
        }
    }

    #[test]
    fn test_fires_once_within_cooldown() {
        let mut rule = AlertRule::new("hit_rate", AlertCondition::MinHitRate(0.9));
        let now = Utc::now();

        assert!(rule.evaluate(&metrics(1, 0), now).is_none());
        assert!(!rule.is_active());

        let alert = rule.evaluate(&metrics(1, 1), now).unwrap();
        assert_eq!(alert.cache_name, "semantic");
        assert!((alert.observed_value - 0.5).abs() < 1e-12);

        assert!(rule.evaluate(&metrics(1, 2), now).is_none());
        assert!(rule.evaluate(&metrics(1, 3), now).is_none());
        assert!(rule.is_active());
        assert_eq!(rule.trigger_count(), 1);
    }

    #[test]
    fn test_fires_again_after_cooldown() {
        let mut rule = AlertRule::new("hit_rate", AlertCondition::MinHitRate(0.9))
            .with_cooldown(Duration::from_secs(60));
        let now = Utc::now();

        assert!(rule.evaluate(&metrics(0, 1), now).is_some());
        assert!(rule
            .evaluate(&metrics(0, 2), now + chrono::Duration::seconds(59))
            .is_none());
        assert!(rule
            .evaluate(&metrics(0, 3), now + chrono::Duration::seconds(61))
            .is_some());
        assert_eq!(rule.trigger_count(), 2);
    }

    #[test]
    fn test_min_requests_gates_rate_rules() {
        let mut rule = AlertRule::new("hit_rate", AlertCondition::MinHitRate(0.9))
            .with_min_requests(10);

        assert!(rule.evaluate(&metrics(0, 5), Utc::now()).is_none());
    }

    #[test]
    fn test_latency_rule_reads_p95() {
        let mut rule = AlertRule::new("latency", AlertCondition::MaxLatencyMs(100.0));
        let mut snapshot = metrics(10, 0);
        snapshot.latency_samples = 10;
        snapshot.p95_latency_ms = 150.0;

        let alert = rule.evaluate(&snapshot, Utc::now()).unwrap();
        assert_eq!(alert.threshold, 100.0);
    }

    #[test]
    fn test_applies_to() {
        let scoped = AlertRule::new("r", AlertCondition::MaxErrorRate(0.1)).for_cache("query");
        let global = AlertRule::new("r", AlertCondition::MaxErrorRate(0.1));

        assert!(scoped.applies_to("query"));
        assert!(!scoped.applies_to("semantic"));
        assert!(global.applies_to("semantic"));
    }
}
