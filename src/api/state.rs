//! Shared state for the HTTP endpoints

use std::sync::Arc;

use crate::domain::store::PersistentStore;
use crate::infrastructure::services::{CacheAnalytics, QueryCacheService, SemanticCacheService};

/// Cache services wired from configuration
#[derive(Clone, Debug)]
pub struct AppState {
    pub store: Arc<dyn PersistentStore>,
    pub semantic: Arc<SemanticCacheService>,
    pub query: Arc<QueryCacheService>,
    pub analytics: Arc<CacheAnalytics>,
}
