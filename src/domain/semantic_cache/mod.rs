//! Semantic cache domain models
//!
//! Entries are matched by embedding similarity rather than requiring
//! exact key matches.

mod config;
mod entry;

pub use config::SemanticCacheConfig;
pub use entry::{
    CacheEntry, GetOrSetResult, SemanticCacheStats, SemanticMatch, SemanticSetOptions,
};
