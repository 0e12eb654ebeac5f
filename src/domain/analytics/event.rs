//! Cache events fed to analytics

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened in a cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheEventKind {
    Hit,
    Miss,
    Eviction,
    Error,
    Expiration,
    /// A set that found an equivalent entry; tracked apart from hits
    Deduplication,
}

impl CacheEventKind {
    pub const ALL: [CacheEventKind; 6] = [
        Self::Hit,
        Self::Miss,
        Self::Eviction,
        Self::Error,
        Self::Expiration,
        Self::Deduplication,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Eviction => "eviction",
            Self::Error => "error",
            Self::Expiration => "expiration",
            Self::Deduplication => "deduplication",
        }
    }

    /// Hits and misses are the lookups that make up the request count
    pub fn is_request(&self) -> bool {
        matches!(self, Self::Hit | Self::Miss)
    }
}

impl std::fmt::Display for CacheEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEvent {
    pub cache_name: String,
    pub kind: CacheEventKind,
    pub timestamp: DateTime<Utc>,
    /// Operation latency in milliseconds, when measured
    pub latency_ms: Option<f64>,
}

impl CacheEvent {
    pub fn new(cache_name: impl Into<String>, kind: CacheEventKind) -> Self {
        Self {
            cache_name: cache_name.into(),
            kind,
            timestamp: Utc::now(),
            latency_ms: None,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_ms = Some(latency.as_secs_f64() * 1000.0);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Receives cache events; implemented by the analytics service
pub trait CacheEventSink: Send + Sync {
    fn record(&self, event: CacheEvent);

    /// Reports the current in-memory entry count of a cache
    fn record_entry_count(&self, cache_name: &str, entries: usize);
}
