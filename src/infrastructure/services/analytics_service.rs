//! Cache analytics: bounded event log, windowed metrics, alerting and reports

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::domain::analytics::{
    recommendations_for, Alert, AlertCallback, AlertRule, AlertSeverity, AnalyticsConfig,
    CacheEvent, CacheEventKind, CacheEventSink, CacheMetrics, CacheReport, CostAnalysis,
    TrendDelta,
};
use crate::domain::store::PersistentStore;
use crate::domain::DomainError;
use crate::infrastructure::observability::{record_alert, record_cache_entries, record_cache_event};

/// Name used for metrics aggregated over every cache
pub const ALL_CACHES: &str = "all";

/// Most recent alerts kept for inspection
const MAX_ALERT_HISTORY: usize = 1000;

/// Collects events from every cache and turns them into metrics, alerts
/// and reports
pub struct CacheAnalytics {
    config: AnalyticsConfig,
    events: RwLock<VecDeque<CacheEvent>>,
    entry_counts: RwLock<HashMap<String, usize>>,
    rules: Mutex<Vec<AlertRule>>,
    callbacks: RwLock<Vec<Arc<dyn AlertCallback>>>,
    history: RwLock<VecDeque<Alert>>,
    store: Option<Arc<dyn PersistentStore>>,
}

impl std::fmt::Debug for CacheAnalytics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheAnalytics")
            .field("config", &self.config)
            .field("events", &read(&self.events).len())
            .field("persist_counters", &self.store.is_some())
            .finish()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CacheAnalytics {
    pub fn new(config: AnalyticsConfig) -> Result<Self, DomainError> {
        config.validate()?;

        let rules = config.alert_rules();

        Ok(Self {
            config,
            events: RwLock::new(VecDeque::new()),
            entry_counts: RwLock::new(HashMap::new()),
            rules: Mutex::new(rules),
            callbacks: RwLock::new(Vec::new()),
            history: RwLock::new(VecDeque::new()),
            store: None,
        })
    }

    /// Mirrors per-kind counters to `{key_prefix}:{cache}:{kind}` when
    /// `persist_counters` is enabled
    pub fn with_store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        if self.config.persist_counters {
            self.store = Some(store);
        }
        self
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    pub fn add_alert_rule(&self, rule: AlertRule) {
        self.rules
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(rule);
    }

    pub fn add_callback(&self, callback: Arc<dyn AlertCallback>) {
        write(&self.callbacks).push(callback);
    }

    /// Snapshot of the rules with their firing state
    pub fn alert_rules(&self) -> Vec<AlertRule> {
        self.rules
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Most recent alerts, newest last
    pub fn alert_history(&self, limit: usize) -> Vec<Alert> {
        let history = read(&self.history);
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    pub fn event_count(&self) -> usize {
        read(&self.events).len()
    }

    /// Every cache that has reported events or an entry count
    pub fn cache_names(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = read(&self.events)
            .iter()
            .map(|event| event.cache_name.clone())
            .collect();
        names.extend(read(&self.entry_counts).keys().cloned());
        names.into_iter().collect()
    }

    /// Records an event and awaits alert callbacks instead of spawning them
    pub async fn record_and_notify(&self, event: CacheEvent) -> Vec<Alert> {
        let alerts = self.ingest(event);

        if !alerts.is_empty() {
            let callbacks = read(&self.callbacks).clone();
            for alert in &alerts {
                notify_all(&callbacks, alert).await;
            }
        }

        alerts
    }

    /// Metrics for one cache, or every cache under [`ALL_CACHES`], over the
    /// trailing `timeframe` (the configured default when `None`)
    pub fn get_metrics(&self, cache_name: Option<&str>, timeframe: Option<Duration>) -> CacheMetrics {
        let end = Utc::now();
        let start = window_start(end, timeframe.unwrap_or_else(|| self.config.default_timeframe()));

        self.metrics_between(cache_name, start, end)
    }

    /// Aggregated report over the trailing `timeframe`, with trends against
    /// the window of equal length before it
    ///
    /// `cache_names` restricts the report (totals included) to those caches.
    pub fn generate_report(&self, cache_names: Option<&[String]>, timeframe: Option<Duration>) -> CacheReport {
        let timeframe = timeframe.unwrap_or_else(|| self.config.default_timeframe());
        let end = Utc::now();
        let start = window_start(end, timeframe);
        let previous_start = window_start(start, timeframe);

        let names = match cache_names {
            Some(names) => names.to_vec(),
            None => self.cache_names(),
        };

        let caches: Vec<CacheMetrics> = names
            .iter()
            .map(|name| self.metrics_between(Some(name), start, end))
            .collect();

        let totals = match cache_names {
            Some(names) => self.metrics_matching(
                ALL_CACHES,
                |cache| names.iter().any(|name| name == cache),
                start,
                end,
            ),
            None => self.metrics_between(None, start, end),
        };

        let trends = caches
            .iter()
            .filter_map(|current| {
                let previous =
                    self.metrics_between(Some(&current.cache_name), previous_start, start);
                (previous.total_requests > 0).then(|| TrendDelta::between(current, &previous))
            })
            .collect();

        let recommendations = caches.iter().flat_map(recommendations_for).collect();

        let hit_miss_ratio = (totals.misses > 0).then(|| totals.hits as f64 / totals.misses as f64);

        CacheReport {
            generated_at: end,
            timeframe_secs: timeframe.as_secs(),
            cost: CostAnalysis::compute(
                totals.hits,
                totals.misses,
                self.config.cost_per_hit,
                self.config.cost_per_miss,
            ),
            caches,
            totals,
            hit_miss_ratio,
            trends,
            recommendations,
        }
    }

    /// Counters persisted for a cache, keyed by event kind
    pub async fn persisted_counters(&self, cache_name: &str) -> Result<HashMap<String, i64>, DomainError> {
        let Some(store) = &self.store else {
            return Ok(HashMap::new());
        };

        let keys: Vec<String> = CacheEventKind::ALL
            .iter()
            .map(|kind| self.counter_key(cache_name, *kind))
            .collect();

        let values = store.multi_get(&keys).await?;
        let mut counters = HashMap::new();

        for kind in CacheEventKind::ALL {
            let Some(bytes) = values.get(&self.counter_key(cache_name, kind)) else {
                continue;
            };

            let count = std::str::from_utf8(bytes)
                .ok()
                .and_then(|text| text.trim().parse::<i64>().ok())
                .ok_or_else(|| {
                    DomainError::analytics(format!(
                        "Counter for {}:{} is not an integer",
                        cache_name,
                        kind.as_str()
                    ))
                })?;

            counters.insert(kind.as_str().to_string(), count);
        }

        Ok(counters)
    }

    /// Drops every recorded event and alert
    pub fn reset(&self) {
        write(&self.events).clear();
        write(&self.history).clear();
    }

    fn counter_key(&self, cache_name: &str, kind: CacheEventKind) -> String {
        format!("{}:{}:{}", self.config.key_prefix, cache_name, kind.as_str())
    }

    fn metrics_between(
        &self,
        cache_name: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CacheMetrics {
        match cache_name {
            Some(name) => self.metrics_matching(name, |cache| cache == name, start, end),
            None => self.metrics_matching(ALL_CACHES, |_| true, start, end),
        }
    }

    fn metrics_matching(
        &self,
        label: &str,
        include: impl Fn(&str) -> bool,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CacheMetrics {
        let events = read(&self.events);
        let selected = events.iter().filter(|event| {
            event.timestamp >= start && event.timestamp <= end && include(event.cache_name.as_str())
        });

        let entry_count = {
            let counts = read(&self.entry_counts);
            counts
                .iter()
                .filter(|(name, _)| include(name.as_str()))
                .map(|(_, count)| *count)
                .reduce(|total, count| total + count)
        };

        CacheMetrics::compute(label, selected, self.config.max_latency_samples)
            .with_window(start, end)
            .with_entry_count(entry_count)
    }

    /// Appends to the log, updates exported metrics and evaluates the rules
    /// for the event's cache; returns the alerts that fired
    fn ingest(&self, event: CacheEvent) -> Vec<Alert> {
        record_cache_event(&event);
        self.persist_counter(&event);

        let cache_name = event.cache_name.clone();
        let now = event.timestamp;

        {
            let mut events = write(&self.events);
            events.push_back(event);
            while events.len() > self.config.max_events {
                events.pop_front();
            }
        }

        let alerts = self.evaluate_rules(&cache_name, now);

        if !alerts.is_empty() {
            let mut history = write(&self.history);
            for alert in &alerts {
                record_alert(alert);

                match alert.severity {
                    AlertSeverity::Critical => {
                        tracing::error!(rule = %alert.rule_name, cache = %alert.cache_name, observed = alert.observed_value, "{}", alert.message)
                    }
                    AlertSeverity::Warning => {
                        warn!(rule = %alert.rule_name, cache = %alert.cache_name, observed = alert.observed_value, "{}", alert.message)
                    }
                }

                history.push_back(alert.clone());
            }
            while history.len() > MAX_ALERT_HISTORY {
                history.pop_front();
            }
        }

        alerts
    }

    fn evaluate_rules(&self, cache_name: &str, now: DateTime<Utc>) -> Vec<Alert> {
        let mut rules = self
            .rules
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut alerts = Vec::new();

        for rule in rules.iter_mut().filter(|rule| rule.applies_to(cache_name)) {
            let metrics = self.metrics_between(Some(cache_name), window_start(now, rule.window()), now);

            if let Some(alert) = rule.evaluate(&metrics, now) {
                alerts.push(alert);
            }
        }

        alerts
    }

    fn persist_counter(&self, event: &CacheEvent) {
        let Some(store) = &self.store else {
            return;
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let store = Arc::clone(store);
        let key = self.counter_key(&event.cache_name, event.kind);

        runtime.spawn(async move {
            if let Err(e) = store.incr(&key, 1).await {
                debug!(key = %key, error = %e, "Failed to persist analytics counter");
            }
        });
    }
}

impl CacheEventSink for CacheAnalytics {
    /// Alert callbacks run on spawned tasks so the cache path never waits
    /// on them; without a runtime they are skipped
    fn record(&self, event: CacheEvent) {
        let alerts = self.ingest(event);

        if alerts.is_empty() {
            return;
        }

        let callbacks = read(&self.callbacks).clone();
        if callbacks.is_empty() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    for alert in &alerts {
                        notify_all(&callbacks, alert).await;
                    }
                });
            }
            Err(_) => {
                warn!(alerts = alerts.len(), "No async runtime, alert callbacks skipped");
            }
        }
    }

    fn record_entry_count(&self, cache_name: &str, entries: usize) {
        record_cache_entries(cache_name, entries);
        write(&self.entry_counts).insert(cache_name.to_string(), entries);
    }
}

async fn notify_all(callbacks: &[Arc<dyn AlertCallback>], alert: &Alert) {
    for callback in callbacks {
        if let Err(e) = callback.notify(alert).await {
            warn!(rule = %alert.rule_name, error = %e, "Alert callback failed");
        }
    }
}

/// Start of the window of length `window` ending at `end`, saturating at the
/// earliest representable instant
fn window_start(end: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|delta| end.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Writes alerts to the log; installed by default by `serve`
#[derive(Debug, Default)]
pub struct LoggingAlertCallback;

#[async_trait]
impl AlertCallback for LoggingAlertCallback {
    async fn notify(&self, alert: &Alert) -> Result<(), DomainError> {
        tracing::info!(
            rule = %alert.rule_name,
            cache = %alert.cache_name,
            threshold = alert.threshold,
            observed = alert.observed_value,
            triggered_at = %alert.triggered_at,
            "Alert notification"
        );
        Ok(())
    }
}
