//! Query result cache domain models
//!
//! Structured results are deduplicated by fingerprint, optionally
//! compressed, and kept fresh by registered warming tasks.

mod config;
mod result;
mod warming;

pub use config::{DedupStrategy, QueryCacheConfig};
pub use result::{
    QueryCacheStats, QueryResult, QuerySetOptions, SetOutcome, StoredQuery,
};
pub use warming::{
    by_priority, compute_fn, ComputeFn, WarmingRunSummary, WarmingStats, WarmingStrategy, WarmingTask,
};
