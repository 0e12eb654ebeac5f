//! Analytics configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::alert::{AlertCondition, AlertRule};
use crate::domain::DomainError;

/// Configuration for cache analytics and alerting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Events kept in the rolling log; the oldest are dropped first
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Latency samples used for percentiles per metrics snapshot
    #[serde(default = "default_max_latency_samples")]
    pub max_latency_samples: usize,

    #[serde(default = "default_cost_per_hit")]
    pub cost_per_hit: f64,

    #[serde(default = "default_cost_per_miss")]
    pub cost_per_miss: f64,

    /// Window used when a caller does not give one
    #[serde(default = "default_timeframe_secs")]
    pub default_timeframe_secs: u64,

    /// Mirror counters to the persistent store when one is attached
    #[serde(default = "default_true")]
    pub persist_counters: bool,

    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Built-in rule: alert when the hit rate drops below this
    #[serde(default)]
    pub min_hit_rate: Option<f64>,

    /// Built-in rule: alert when p95 latency exceeds this many milliseconds
    #[serde(default)]
    pub max_latency_ms: Option<f64>,

    /// Built-in rule: alert when errors exceed this fraction of operations
    #[serde(default)]
    pub max_error_rate: Option<f64>,

    #[serde(default = "default_alert_cooldown_secs")]
    pub alert_cooldown_secs: u64,

    /// Window alert rules evaluate over
    #[serde(default = "default_alert_window_secs")]
    pub alert_window_secs: u64,

    /// Requests needed in the window before rate-based rules can fire
    #[serde(default = "default_alert_min_requests")]
    pub alert_min_requests: u64,
}

fn default_max_events() -> usize {
    100_000
}

fn default_max_latency_samples() -> usize {
    1000
}

fn default_cost_per_hit() -> f64 {
    0.0001
}

fn default_cost_per_miss() -> f64 {
    0.01
}

fn default_timeframe_secs() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

fn default_key_prefix() -> String {
    "analytics".to_string()
}

fn default_alert_cooldown_secs() -> u64 {
    300
}

fn default_alert_window_secs() -> u64 {
    300
}

fn default_alert_min_requests() -> u64 {
    1
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
            max_latency_samples: default_max_latency_samples(),
            cost_per_hit: default_cost_per_hit(),
            cost_per_miss: default_cost_per_miss(),
            default_timeframe_secs: default_timeframe_secs(),
            persist_counters: default_true(),
            key_prefix: default_key_prefix(),
            min_hit_rate: None,
            max_latency_ms: None,
            max_error_rate: None,
            alert_cooldown_secs: default_alert_cooldown_secs(),
            alert_window_secs: default_alert_window_secs(),
            alert_min_requests: default_alert_min_requests(),
        }
    }
}

impl AnalyticsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_timeframe(&self) -> Duration {
        Duration::from_secs(self.default_timeframe_secs)
    }

    pub fn alert_cooldown(&self) -> Duration {
        Duration::from_secs(self.alert_cooldown_secs)
    }

    pub fn alert_window(&self) -> Duration {
        Duration::from_secs(self.alert_window_secs)
    }

    pub fn with_max_events(mut self, max: usize) -> Self {
        self.max_events = max;
        self
    }

    pub fn with_costs(mut self, cost_per_hit: f64, cost_per_miss: f64) -> Self {
        self.cost_per_hit = cost_per_hit;
        self.cost_per_miss = cost_per_miss;
        self
    }

    pub fn with_persist_counters(mut self, enabled: bool) -> Self {
        self.persist_counters = enabled;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_min_hit_rate(mut self, threshold: f64) -> Self {
        self.min_hit_rate = Some(threshold);
        self
    }

    pub fn with_max_latency_ms(mut self, threshold: f64) -> Self {
        self.max_latency_ms = Some(threshold);
        self
    }

    pub fn with_max_error_rate(mut self, threshold: f64) -> Self {
        self.max_error_rate = Some(threshold);
        self
    }

    pub fn with_alert_cooldown(mut self, cooldown: Duration) -> Self {
        self.alert_cooldown_secs = cooldown.as_secs();
        self
    }

    /// Alert rules implied by the configured thresholds
    pub fn alert_rules(&self) -> Vec<AlertRule> {
        let conditions = [
            self.min_hit_rate.map(AlertCondition::MinHitRate),
            self.max_latency_ms.map(AlertCondition::MaxLatencyMs),
            self.max_error_rate.map(AlertCondition::MaxErrorRate),
        ];

        conditions
            .into_iter()
            .flatten()
            .map(|condition| {
                AlertRule::new(condition.default_name(), condition)
                    .with_cooldown(self.alert_cooldown())
                    .with_window(self.alert_window())
                    .with_min_requests(self.alert_min_requests)
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.cost_per_hit < 0.0 || self.cost_per_miss < 0.0 {
            return Err(DomainError::validation("analytics costs must not be negative"));
        }

        if self.max_events == 0 {
            return Err(DomainError::validation("analytics.max_events must be at least 1"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_no_rules() {
        let config = AnalyticsConfig::default();

        assert!(config.alert_rules().is_empty());
        assert!((config.cost_per_miss - 0.01).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_thresholds_become_rules() {
        let config = AnalyticsConfig::new()
            .with_min_hit_rate(0.9)
            .with_max_error_rate(0.05)
            .with_alert_cooldown(Duration::from_secs(60));

        let rules = config.alert_rules();

        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].name(), "min_hit_rate");
        assert_eq!(rules[0].cooldown(), Duration::from_secs(60));
        assert_eq!(rules[1].name(), "max_error_rate");
    }

    #[test]
    fn test_negative_cost_is_invalid() {
        let config = AnalyticsConfig::new().with_costs(-1.0, 0.01);
        assert!(config.validate().is_err());
    }
}
