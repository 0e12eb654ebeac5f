//! Cache key derivation and eviction strategies shared by both caches

mod eviction;
mod key;

pub use eviction::{EvictionCandidate, EvictionOutcome, EvictionPolicy};
pub use key::{
    canonical_json, hash_json, hash_query, normalize_query, CacheKeyGenerator, QueryFingerprint,
    DEFAULT_NUM_BUCKETS,
};
