//! Semantic cache configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::cache::{EvictionPolicy, DEFAULT_NUM_BUCKETS};
use crate::domain::DomainError;

/// Configuration for semantic caching
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticCacheConfig {
    /// Minimum similarity for a near match (-1.0 to 1.0)
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    #[serde(default)]
    pub eviction_policy: EvictionPolicy,

    /// Maximum number of entries held in memory
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// TTL applied when `set` gets none; `None` means entries never expire
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: Option<u64>,

    /// Namespace prefix for persisted keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Mirror entries to the persistent store
    #[serde(default = "default_true")]
    pub enable_persistence: bool,

    /// Buckets the leading embedding dimension is quantized into
    #[serde(default = "default_num_buckets")]
    pub num_buckets: usize,

    /// Neighbouring buckets searched on each side of the query's bucket
    #[serde(default = "default_bucket_radius")]
    pub bucket_radius: usize,

    /// Upper bound on remote keys fetched per bucket during a near-match scan
    #[serde(default = "default_max_remote_candidates")]
    pub max_remote_candidates: usize,
}

fn default_similarity_threshold() -> f32 {
    0.85
}

fn default_max_entries() -> usize {
    10000
}

fn default_ttl_secs() -> Option<u64> {
    Some(3600)
}

fn default_key_prefix() -> String {
    "semantic".to_string()
}

fn default_true() -> bool {
    true
}

fn default_num_buckets() -> usize {
    DEFAULT_NUM_BUCKETS
}

fn default_bucket_radius() -> usize {
    1
}

fn default_max_remote_candidates() -> usize {
    500
}

impl Default for SemanticCacheConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            eviction_policy: EvictionPolicy::default(),
            max_entries: default_max_entries(),
            default_ttl_secs: default_ttl_secs(),
            key_prefix: default_key_prefix(),
            enable_persistence: default_true(),
            num_buckets: default_num_buckets(),
            bucket_radius: default_bucket_radius(),
            max_remote_candidates: default_max_remote_candidates(),
        }
    }
}

impl SemanticCacheConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Default TTL as Duration
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs.map(Duration::from_secs)
    }

    /// Set the similarity threshold
    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold.clamp(-1.0, 1.0);
        self
    }

    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    /// Set the maximum number of entries
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl_secs = ttl.map(|ttl| ttl.as_secs());
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_persistence(mut self, enabled: bool) -> Self {
        self.enable_persistence = enabled;
        self
    }

    pub fn with_num_buckets(mut self, num_buckets: usize) -> Self {
        self.num_buckets = num_buckets;
        self
    }

    pub fn with_bucket_radius(mut self, radius: usize) -> Self {
        self.bucket_radius = radius;
        self
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.max_entries == 0 {
            return Err(DomainError::validation("semantic.max_entries must be at least 1"));
        }

        if self.num_buckets == 0 || self.num_buckets > 1000 {
            return Err(DomainError::validation(
                "semantic.num_buckets must be between 1 and 1000",
            ));
        }

        if self.key_prefix.is_empty() {
            return Err(DomainError::validation("semantic.key_prefix must not be empty"));
        }

        Ok(())
    }
}
