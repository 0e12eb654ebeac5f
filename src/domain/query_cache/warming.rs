//! Cache warming task definitions

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

/// Recomputes a query result on demand
pub type ComputeFn =
    Arc<dyn Fn() -> BoxFuture<'static, Result<serde_json::Value, DomainError>> + Send + Sync>;

/// Wraps an async closure as a [`ComputeFn`]
pub fn compute_fn<F, Fut>(f: F) -> ComputeFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, DomainError>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// How the background scheduler picks tasks to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmingStrategy {
    /// No background warming; `warm_now` still works
    #[default]
    Disabled,
    /// Every interval, run each task that is due
    Scheduled,
    /// One due task per short sleep, highest priority first
    Incremental,
    /// Re-run tasks whose entries are accessed often
    Preemptive,
}

impl fmt::Display for WarmingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Scheduled => write!(f, "scheduled"),
            Self::Incremental => write!(f, "incremental"),
            Self::Preemptive => write!(f, "preemptive"),
        }
    }
}

/// A query registered for warming
#[derive(Clone)]
pub struct WarmingTask {
    pub id: String,
    pub query: String,
    pub params: serde_json::Value,
    pub compute: ComputeFn,
    /// Higher runs first
    pub priority: i32,
    /// Per-task period; falls back to the scheduler interval
    pub interval: Option<Duration>,
    pub ttl: Option<Duration>,
    pub tags: BTreeSet<String>,
    pub last_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub failure_count: u64,
    pub last_error: Option<String>,
}

impl fmt::Debug for WarmingTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarmingTask")
            .field("id", &self.id)
            .field("query", &self.query)
            .field("priority", &self.priority)
            .field("interval", &self.interval)
            .field("last_run", &self.last_run)
            .field("run_count", &self.run_count)
            .field("failure_count", &self.failure_count)
            .field("compute", &"<fn>")
            .finish()
    }
}

impl WarmingTask {
    pub fn new(query: impl Into<String>, params: serde_json::Value, compute: ComputeFn) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            query: query.into(),
            params,
            compute,
            priority: 0,
            interval: None,
            ttl: None,
            tags: BTreeSet::new(),
            last_run: None,
            run_count: 0,
            failure_count: 0,
            last_error: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Never-run tasks are always due
    pub fn is_due(&self, now: DateTime<Utc>, default_interval: Duration) -> bool {
        let Some(last_run) = self.last_run else {
            return true;
        };

        let interval = self.interval.unwrap_or(default_interval);
        let elapsed = (now - last_run).to_std().unwrap_or(Duration::ZERO);

        elapsed >= interval
    }
}

/// Orders tasks for a run: priority descending, then least recently run
pub fn by_priority(a: &WarmingTask, b: &WarmingTask) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.last_run.cmp(&b.last_run))
}

/// Counts from one pass over the registered tasks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmingRunSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl WarmingRunSummary {
    pub fn merge(&mut self, other: WarmingRunSummary) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
    }
}

/// Cumulative warming counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WarmingStats {
    pub registered_tasks: usize,
    pub runs: u64,
    pub succeeded: u64,
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop() -> ComputeFn {
        compute_fn(|| async { Ok(json!(null)) })
    }

    #[test]
    fn test_task_due_when_never_run() {
        let task = WarmingTask::new("select 1", json!({}), noop());
        assert!(task.is_due(Utc::now(), Duration::from_secs(60)));
    }

    #[test]
    fn test_task_interval_overrides_default() {
        let now = Utc::now();
        let mut task = WarmingTask::new("select 1", json!({}), noop())
            .with_interval(Duration::from_secs(10));
        task.last_run = Some(now - chrono::Duration::seconds(15));

        assert!(task.is_due(now, Duration::from_secs(3600)));

        task.interval = None;
        assert!(!task.is_due(now, Duration::from_secs(3600)));
    }

    #[test]
    fn test_priority_ordering() {
        let now = Utc::now();
        let low = WarmingTask::new("low", json!({}), noop()).with_priority(1);
        let mut high_recent = WarmingTask::new("high-recent", json!({}), noop()).with_priority(5);
        high_recent.last_run = Some(now);
        let mut high_stale = WarmingTask::new("high-stale", json!({}), noop()).with_priority(5);
        high_stale.last_run = Some(now - chrono::Duration::minutes(5));

        let mut tasks = vec![low, high_recent, high_stale];
        tasks.sort_by(by_priority);

        let order: Vec<_> = tasks.iter().map(|t| t.query.as_str()).collect();
        assert_eq!(order, vec!["high-stale", "high-recent", "low"]);
    }

    #[test]
    fn test_summary_merge() {
        let mut total = WarmingRunSummary::default();
        total.merge(WarmingRunSummary {
            attempted: 2,
            succeeded: 1,
            failed: 1,
        });
        total.merge(WarmingRunSummary {
            attempted: 1,
            succeeded: 1,
            failed: 0,
        });

        assert_eq!(total.attempted, 3);
        assert_eq!(total.succeeded, 2);
        assert_eq!(total.failed, 1);
    }
}
