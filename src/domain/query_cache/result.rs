//! Query cache records

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::warming::WarmingStats;
use crate::domain::cache::{EvictionCandidate, QueryFingerprint};
use crate::domain::store::compression::{compress_if_smaller, decompress_text};
use crate::domain::DomainError;

/// A cached structured result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    key: String,
    query: String,
    /// JSON text of the result, or base64 gzip of it when `compressed`
    payload: String,
    fingerprint: QueryFingerprint,
    created_at: DateTime<Utc>,
    /// Fixed at insertion from `created_at + ttl`
    expires_at: Option<DateTime<Utc>>,
    access_count: u64,
    last_accessed: DateTime<Utc>,
    execution_time_ms: u64,
    /// Size of the uncompressed JSON
    size_bytes: usize,
    tags: BTreeSet<String>,
    compressed: bool,
    #[serde(skip)]
    insert_seq: u64,
    #[serde(skip)]
    touch_seq: u64,
}

impl QueryResult {
    /// Builds a record, compressing the payload when it exceeds
    /// `compression_threshold` and gzip makes it smaller
    pub fn new(
        key: impl Into<String>,
        query: impl Into<String>,
        result: &serde_json::Value,
        fingerprint: QueryFingerprint,
        ttl: Option<Duration>,
        compression_threshold: Option<usize>,
    ) -> Result<Self, DomainError> {
        let text = serde_json::to_string(result).map_err(|e| {
            DomainError::serialization(format!("Failed to serialize query result: {}", e))
        })?;
        let size_bytes = text.len();

        let (payload, compressed) = match compression_threshold {
            Some(threshold) => match compress_if_smaller(&text, threshold)? {
                Some(encoded) => (encoded, true),
                None => (text, false),
            },
            None => (text, false),
        };

        let now = Utc::now();
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| now.checked_add_signed(ttl));

        Ok(Self {
            key: key.into(),
            query: query.into(),
            payload,
            fingerprint,
            created_at: now,
            expires_at,
            access_count: 0,
            last_accessed: now,
            execution_time_ms: 0,
            size_bytes,
            tags: BTreeSet::new(),
            compressed,
            insert_seq: 0,
            touch_seq: 0,
        })
    }

    pub fn with_tags(mut self, tags: BTreeSet<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_execution_time(mut self, execution_time: Duration) -> Self {
        self.execution_time_ms = execution_time.as_millis() as u64;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn fingerprint(&self) -> &QueryFingerprint {
        &self.fingerprint
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Bytes actually held for the payload
    pub fn stored_bytes(&self) -> usize {
        self.payload.len()
    }

    pub fn execution_time(&self) -> Duration {
        Duration::from_millis(self.execution_time_ms)
    }

    pub fn last_accessed(&self) -> DateTime<Utc> {
        self.last_accessed
    }

    /// Decodes the result, reversing compression transparently
    pub fn value(&self) -> Result<serde_json::Value, DomainError> {
        let text = if self.compressed {
            decompress_text(&self.payload)?
        } else {
            self.payload.clone()
        };

        serde_json::from_str(&text).map_err(|e| {
            DomainError::serialization(format!("Failed to deserialize query result: {}", e))
        })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at
            .map(|expires_at| (expires_at - now).to_std().unwrap_or(Duration::ZERO))
    }

    /// Total lifetime granted at insertion
    pub fn lifetime(&self) -> Option<Duration> {
        self.expires_at
            .map(|expires_at| (expires_at - self.created_at).to_std().unwrap_or(Duration::ZERO))
    }

    /// Fraction of the lifetime still left, `None` for entries without expiry
    pub fn remaining_fraction(&self, now: DateTime<Utc>) -> Option<f64> {
        let lifetime = self.lifetime()?.as_secs_f64();
        let remaining = self.remaining_ttl(now)?.as_secs_f64();

        if lifetime <= 0.0 {
            return Some(0.0);
        }

        Some((remaining / lifetime).clamp(0.0, 1.0))
    }

    pub fn touch(&mut self, seq: u64, now: DateTime<Utc>) {
        self.access_count += 1;
        self.last_accessed = now;
        self.touch_seq = seq;
    }

    /// Keeps the usage history of the record this one replaces
    pub fn carry_usage_from(&mut self, previous: &QueryResult) {
        self.access_count = previous.access_count;
        self.last_accessed = previous.last_accessed;
    }

    pub fn stamp(&mut self, seq: u64) {
        self.insert_seq = seq;
        self.touch_seq = seq;
    }
}

impl EvictionCandidate for QueryResult {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn access_count(&self) -> u64 {
        self.access_count
    }

    fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    fn insert_seq(&self) -> u64 {
        self.insert_seq
    }

    fn touch_seq(&self) -> u64 {
        self.touch_seq
    }
}

/// Shape of a record under a query-cache key in the persistent store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoredQuery {
    Result(QueryResult),
    /// Key deduplicated onto another entry
    Alias { canonical_key: String },
}

/// Options for a query `set`
#[derive(Debug, Clone, Default)]
pub struct QuerySetOptions {
    pub ttl: Option<Duration>,
    pub no_expiry: bool,
    pub tags: BTreeSet<String>,
    /// How long the caller spent producing the result
    pub execution_time: Option<Duration>,
}

impl QuerySetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn without_expiry(mut self) -> Self {
        self.no_expiry = true;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_execution_time(mut self, execution_time: Duration) -> Self {
        self.execution_time = Some(execution_time);
        self
    }
}

/// What a `set` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetOutcome {
    Inserted { key: String },
    /// An equivalent entry already existed; `key` is the existing entry's key
    Deduplicated { key: String },
}

impl SetOutcome {
    /// Key that now serves the stored value
    pub fn key(&self) -> &str {
        match self {
            Self::Inserted { key } | Self::Deduplicated { key } => key,
        }
    }

    pub fn is_deduplicated(&self) -> bool {
        matches!(self, Self::Deduplicated { .. })
    }
}

/// Statistics for the query cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryCacheStats {
    pub entries: usize,
    pub aliases: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    /// Sets that found an equivalent entry; never counted as hits
    pub deduplicated: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub errors: u64,
    pub compressed_entries: usize,
    /// Payload bytes held in memory after compression
    pub stored_bytes: usize,
    pub refreshes: u64,
    pub remote_available: bool,
    pub warming: WarmingStats,
}

impl QueryCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;

        if total == 0 {
            return 0.0;
        }

        self.hits as f64 / total as f64
    }
}
