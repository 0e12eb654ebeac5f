//! PMP Result Cache
//!
//! A two-tier result cache for expensive computations:
//! - Semantic cache matching queries by embedding similarity
//! - Query result cache with fingerprint deduplication and warming
//! - Pooled Redis, clustered and in-memory persistent stores
//! - Analytics with windowed metrics, alerts and reports

pub mod api;
pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;

use std::sync::Arc;

use api::state::AppState;
use domain::analytics::CacheEventSink;
use domain::Serializer;
use infrastructure::{
    embedding::EmbeddingFactory,
    services::{CacheAnalytics, LoggingAlertCallback, QueryCacheService, SemanticCacheService},
    store::StoreFactory,
};
use tracing::info;

/// Cache name the semantic cache reports events under
pub const SEMANTIC_CACHE_NAME: &str = "semantic";
/// Cache name the query cache reports events under
pub const QUERY_CACHE_NAME: &str = "query";

/// Create the application state with the default configuration
pub async fn create_app_state() -> anyhow::Result<AppState> {
    create_app_state_with_config(&AppConfig::default()).await
}

/// Connects the store and wires both caches to one analytics instance
pub async fn create_app_state_with_config(config: &AppConfig) -> anyhow::Result<AppState> {
    let store = StoreFactory::create(&config.store).await?;
    let serializer = Serializer::new(config.store.serialization);
    let embedder = EmbeddingFactory::create(&config.embedding)?;

    let analytics = Arc::new(CacheAnalytics::new(config.analytics.clone())?.with_store(store.clone()));
    analytics.add_callback(Arc::new(LoggingAlertCallback));
    let sink: Arc<dyn CacheEventSink> = analytics.clone();

    let semantic = SemanticCacheService::new(SEMANTIC_CACHE_NAME, config.semantic.clone(), embedder)?
        .with_serializer(serializer)
        .with_store(store.clone())
        .with_event_sink(sink.clone());

    let query = QueryCacheService::new(QUERY_CACHE_NAME, config.query.clone())?
        .with_serializer(serializer)
        .with_store(store.clone())
        .with_event_sink(sink);

    info!(
        store = %config.store.backend,
        embedding = %config.embedding.provider,
        serialization = ?config.store.serialization,
        "Caches initialized"
    );

    Ok(AppState {
        store,
        semantic: Arc::new(semantic),
        query: Arc::new(query),
        analytics,
    })
}
