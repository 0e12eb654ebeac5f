//! Domain layer - cache types, strategies and the traits infrastructure implements

pub mod analytics;
pub mod cache;
pub mod embedding;
pub mod error;
pub mod health;
pub mod query_cache;
pub mod semantic_cache;
pub mod store;

pub use analytics::{
    Alert, AlertCallback, AlertCondition, AlertRule, AnalyticsConfig, CacheEvent, CacheEventKind,
    CacheEventSink, CacheMetrics, CacheReport,
};
pub use cache::{CacheKeyGenerator, EvictionPolicy, QueryFingerprint};
pub use embedding::{cosine_similarity, EmbeddingProvider};
pub use error::DomainError;
pub use health::{HealthReport, HealthStatus};
pub use query_cache::{DedupStrategy, QueryCacheConfig, WarmingStrategy, WarmingTask};
pub use semantic_cache::SemanticCacheConfig;
pub use store::{PersistentStore, SerializationFormat, Serializer};
