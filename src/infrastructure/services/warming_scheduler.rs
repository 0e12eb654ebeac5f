//! Background warming loop for the query cache

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::QueryCacheService;
use crate::domain::query_cache::WarmingRunSummary;
use crate::domain::WarmingStrategy;

/// Handle to a running warming loop
#[derive(Debug)]
pub struct WarmingHandle {
    strategy: WarmingStrategy,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WarmingHandle {
    pub fn strategy(&self) -> WarmingStrategy {
        self.strategy
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Signals the loop and waits for the current pass to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

/// Drives `QueryCacheService` warming according to its configured strategy
#[derive(Debug, Default)]
pub struct WarmingScheduler;

impl WarmingScheduler {
    /// Spawns the loop; `None` when warming is disabled
    ///
    /// * `scheduled`: due tasks every `warming_interval`
    /// * `incremental`: one due task every `incremental_delay`
    /// * `preemptive`: tasks whose entries are hot, every `warming_interval`
    pub fn start(cache: Arc<QueryCacheService>) -> Option<WarmingHandle> {
        let strategy = cache.config().warming_strategy;

        let period = match strategy {
            WarmingStrategy::Disabled => return None,
            WarmingStrategy::Incremental => cache.config().incremental_delay(),
            WarmingStrategy::Scheduled | WarmingStrategy::Preemptive => {
                cache.config().warming_interval()
            }
        };

        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(run_loop(cache, strategy, period, rx));

        Some(WarmingHandle {
            strategy,
            shutdown,
            task,
        })
    }
}

async fn run_loop(
    cache: Arc<QueryCacheService>,
    strategy: WarmingStrategy,
    period: Duration,
    mut rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(cache = %cache.name(), strategy = %strategy, period_ms = period.as_millis() as u64, "Cache warming started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let summary = run_pass(&cache, strategy).await;

                if summary.attempted > 0 {
                    debug!(
                        cache = %cache.name(),
                        attempted = summary.attempted,
                        failed = summary.failed,
                        "Warming tick"
                    );
                }

                // Expired entries are only otherwise dropped on access
                cache.purge_expired().await;
            }
            _ = rx.changed() => {
                if *rx.borrow() {
                    break;
                }
            }
        }
    }

    info!(cache = %cache.name(), "Cache warming stopped");
}

async fn run_pass(cache: &QueryCacheService, strategy: WarmingStrategy) -> WarmingRunSummary {
    match strategy {
        WarmingStrategy::Disabled => WarmingRunSummary::default(),
        WarmingStrategy::Scheduled => cache.run_due_tasks().await,
        WarmingStrategy::Incremental => cache.run_next_due_task().await,
        WarmingStrategy::Preemptive => cache.run_hot_tasks().await,
    }
}
