//! Cache services built on the domain models and the persistent store

mod analytics_service;
mod query_cache_service;
mod remote_tier;
mod semantic_cache_service;
mod warming_scheduler;

pub use analytics_service::{CacheAnalytics, LoggingAlertCallback, ALL_CACHES};
pub use query_cache_service::QueryCacheService;
pub use semantic_cache_service::SemanticCacheService;
pub use warming_scheduler::{WarmingHandle, WarmingScheduler};
