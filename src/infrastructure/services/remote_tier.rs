//! Availability tracking for the persistent tier of a cache

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::store::PersistentStore;
use crate::domain::{DomainError, HealthReport};

/// Wraps the shared store; failed calls degrade the cache to memory-only
/// instead of reaching the caller
#[derive(Debug)]
pub(crate) struct RemoteTier {
    cache_name: String,
    store: Arc<dyn PersistentStore>,
    available: AtomicBool,
}

impl RemoteTier {
    pub(crate) fn new(cache_name: impl Into<String>, store: Arc<dyn PersistentStore>) -> Self {
        Self {
            cache_name: cache_name.into(),
            store,
            available: AtomicBool::new(true),
        }
    }

    pub(crate) fn store(&self) -> &dyn PersistentStore {
        self.store.as_ref()
    }

    pub(crate) fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    /// Unwraps a store result; errors are logged once per outage and become `None`
    pub(crate) fn absorb<T>(&self, operation: &str, result: Result<T, DomainError>) -> Option<T> {
        match result {
            Ok(value) => {
                if !self.available.swap(true, Ordering::Relaxed) {
                    info!(cache = %self.cache_name, operation, "Remote tier recovered");
                }
                Some(value)
            }
            Err(e) => {
                if self.available.swap(false, Ordering::Relaxed) {
                    warn!(
                        cache = %self.cache_name,
                        operation,
                        error = %e,
                        tier_error = e.is_tier_unavailable(),
                        "Remote tier unavailable, serving from memory only"
                    );
                }
                None
            }
        }
    }

    pub(crate) async fn health(&self) -> HealthReport {
        let report = self.store.health_check().await;

        self.absorb::<()>(
            "health_check",
            if report.is_healthy() {
                Ok(())
            } else {
                Err(DomainError::connection("health check failed"))
            },
        );

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::store::MockPersistentStore;
    use crate::infrastructure::store::InMemoryStore;

    #[test]
    fn test_absorb_flips_availability() {
        let tier = RemoteTier::new("test", Arc::new(InMemoryStore::new()));

        assert_eq!(tier.absorb("get", Ok(1)), Some(1));
        assert!(tier.is_available());

        assert_eq!(
            tier.absorb::<i32>("get", Err(DomainError::connection("refused"))),
            None
        );
        assert!(!tier.is_available());

        assert_eq!(tier.absorb("get", Ok(2)), Some(2));
        assert!(tier.is_available());
    }

    #[tokio::test]
    async fn test_unhealthy_store_marks_tier_down() {
        let mut store = MockPersistentStore::new();
        store
            .expect_health_check()
            .returning(|| HealthReport::unhealthy("connection refused"));

        let tier = RemoteTier::new("test", Arc::new(store));
        let report = tier.health().await;

        assert!(!report.is_healthy());
        assert!(!tier.is_available());
    }
}
