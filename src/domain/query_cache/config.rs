//! Query cache configuration

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::warming::WarmingStrategy;
use crate::domain::cache::EvictionPolicy;
use crate::domain::DomainError;

/// How a `set` detects that an equivalent result is already cached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupStrategy {
    /// Every set writes its own entry
    None,
    /// Same key and same content
    ExactMatch,
    /// Same result content, regardless of query or parameters
    #[default]
    ContentHash,
    /// Same normalized query, regardless of parameters
    Parameterized,
}

impl std::fmt::Display for DedupStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::ExactMatch => write!(f, "exact_match"),
            Self::ContentHash => write!(f, "content_hash"),
            Self::Parameterized => write!(f, "parameterized"),
        }
    }
}

impl FromStr for DedupStrategy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "exact_match" | "exact" => Ok(Self::ExactMatch),
            "content_hash" | "content" => Ok(Self::ContentHash),
            "parameterized" => Ok(Self::Parameterized),
            _ => Err(DomainError::configuration(format!(
                "Unknown dedup strategy: {}",
                s
            ))),
        }
    }
}

/// Configuration for the query result cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryCacheConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// TTL applied when `set` gets none; `None` means entries never expire
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: Option<u64>,

    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    #[serde(default)]
    pub eviction_policy: EvictionPolicy,

    #[serde(default)]
    pub dedup_strategy: DedupStrategy,

    #[serde(default = "default_true")]
    pub enable_compression: bool,

    /// Payloads above this size are compressed when that makes them smaller
    #[serde(default = "default_compression_threshold_bytes")]
    pub compression_threshold_bytes: usize,

    #[serde(default = "default_true")]
    pub enable_persistence: bool,

    #[serde(default)]
    pub warming_strategy: WarmingStrategy,

    /// Period of the scheduled and preemptive warming loops
    #[serde(default = "default_warming_interval_secs")]
    pub warming_interval_secs: u64,

    /// Sleep between tasks in incremental warming
    #[serde(default = "default_incremental_delay_ms")]
    pub incremental_delay_ms: u64,

    /// Access count at which preemptive warming refreshes an entry
    #[serde(default = "default_preemptive_min_access_count")]
    pub preemptive_min_access_count: u64,

    /// Remaining TTL fraction below which `get_with_refresh` recomputes
    #[serde(default = "default_refresh_threshold")]
    pub refresh_threshold: f64,
}

fn default_max_entries() -> usize {
    10000
}

fn default_ttl_secs() -> Option<u64> {
    Some(3600)
}

fn default_key_prefix() -> String {
    "query".to_string()
}

fn default_true() -> bool {
    true
}

fn default_compression_threshold_bytes() -> usize {
    1024
}

fn default_warming_interval_secs() -> u64 {
    300
}

fn default_incremental_delay_ms() -> u64 {
    1000
}

fn default_preemptive_min_access_count() -> u64 {
    5
}

fn default_refresh_threshold() -> f64 {
    0.2
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            default_ttl_secs: default_ttl_secs(),
            key_prefix: default_key_prefix(),
            eviction_policy: EvictionPolicy::default(),
            dedup_strategy: DedupStrategy::default(),
            enable_compression: default_true(),
            compression_threshold_bytes: default_compression_threshold_bytes(),
            enable_persistence: default_true(),
            warming_strategy: WarmingStrategy::default(),
            warming_interval_secs: default_warming_interval_secs(),
            incremental_delay_ms: default_incremental_delay_ms(),
            preemptive_min_access_count: default_preemptive_min_access_count(),
            refresh_threshold: default_refresh_threshold(),
        }
    }
}

impl QueryCacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs.map(Duration::from_secs)
    }

    pub fn warming_interval(&self) -> Duration {
        Duration::from_secs(self.warming_interval_secs.max(1))
    }

    pub fn incremental_delay(&self) -> Duration {
        Duration::from_millis(self.incremental_delay_ms.max(1))
    }

    /// Threshold passed to the compressor, `None` when compression is off
    pub fn compression_threshold(&self) -> Option<usize> {
        self.enable_compression
            .then_some(self.compression_threshold_bytes)
    }

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

    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    pub fn with_dedup_strategy(mut self, strategy: DedupStrategy) -> Self {
        self.dedup_strategy = strategy;
        self
    }

    pub fn with_compression(mut self, enabled: bool, threshold_bytes: usize) -> Self {
        self.enable_compression = enabled;
        self.compression_threshold_bytes = threshold_bytes;
        self
    }

    pub fn with_persistence(mut self, enabled: bool) -> Self {
        self.enable_persistence = enabled;
        self
    }

    pub fn with_warming_strategy(mut self, strategy: WarmingStrategy) -> Self {
        self.warming_strategy = strategy;
        self
    }

    pub fn with_warming_interval(mut self, interval: Duration) -> Self {
        self.warming_interval_secs = interval.as_secs();
        self
    }

    pub fn with_incremental_delay(mut self, delay: Duration) -> Self {
        self.incremental_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_preemptive_min_access_count(mut self, count: u64) -> Self {
        self.preemptive_min_access_count = count;
        self
    }

    pub fn with_refresh_threshold(mut self, threshold: f64) -> Self {
        self.refresh_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.max_entries == 0 {
            return Err(DomainError::validation("query.max_entries must be at least 1"));
        }

        if self.key_prefix.is_empty() {
            return Err(DomainError::validation("query.key_prefix must not be empty"));
        }

        Ok(())
    }
}
