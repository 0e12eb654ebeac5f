//! Semantic cache entry and result types

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::cache::EvictionCandidate;
use crate::domain::DomainError;

/// A cached value together with the embedding it was stored under
///
/// Persisted as-is; the sequence numbers are local bookkeeping and are
/// reassigned when an entry is loaded from the remote tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    key: String,
    query: String,
    /// JSON text of the cached value
    value: String,
    embedding: Vec<f32>,
    created_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
    access_count: u64,
    /// `None` means the entry never expires
    ttl_ms: Option<u64>,
    tags: BTreeSet<String>,
    #[serde(skip)]
    insert_seq: u64,
    #[serde(skip)]
    touch_seq: u64,
}

impl CacheEntry {
    pub fn new(
        key: impl Into<String>,
        query: impl Into<String>,
        value: &serde_json::Value,
        embedding: Vec<f32>,
        ttl: Option<Duration>,
    ) -> Result<Self, DomainError> {
        let value = serde_json::to_string(value).map_err(|e| {
            DomainError::serialization(format!("Failed to serialize cached value: {}", e))
        })?;
        let now = Utc::now();

        Ok(Self {
            key: key.into(),
            query: query.into(),
            value,
            embedding,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            ttl_ms: ttl.map(|ttl| u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)),
            tags: BTreeSet::new(),
            insert_seq: 0,
            touch_seq: 0,
        })
    }

    pub fn with_tags(mut self, tags: BTreeSet<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn embedding(&self) -> &[f32] {
        &self.embedding
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn last_accessed(&self) -> DateTime<Utc> {
        self.last_accessed
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }

    /// Deserialize the cached value
    pub fn value<T: DeserializeOwned>(&self) -> Result<T, DomainError> {
        serde_json::from_str(&self.value).map_err(|e| {
            DomainError::serialization(format!("Failed to deserialize cached value: {}", e))
        })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expires_at| now >= expires_at)
    }

    /// Time left before expiry, zero once expired
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at()
            .map(|expires_at| (expires_at - now).to_std().unwrap_or(Duration::ZERO))
    }

    /// Records a hit
    pub fn touch(&mut self, seq: u64, now: DateTime<Utc>) {
        self.access_count += 1;
        self.last_accessed = now;
        self.touch_seq = seq;
    }

    /// Assigns the logical insertion time when the entry enters memory
    pub fn stamp(&mut self, seq: u64) {
        self.insert_seq = seq;
        self.touch_seq = seq;
    }
}

impl EvictionCandidate for CacheEntry {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn access_count(&self) -> u64 {
        self.access_count
    }

    fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.ttl_ms
            .and_then(|ms| chrono::Duration::try_milliseconds(ms.min(i64::MAX as u64) as i64))
            .and_then(|ttl| self.created_at.checked_add_signed(ttl))
    }

    fn insert_seq(&self) -> u64 {
        self.insert_seq
    }

    fn touch_seq(&self) -> u64 {
        self.touch_seq
    }
}

/// Options for a semantic `set`
#[derive(Debug, Clone, Default)]
pub struct SemanticSetOptions {
    /// Overrides the configured default TTL
    pub ttl: Option<Duration>,
    /// Store without expiry even when a default TTL is configured
    pub no_expiry: bool,
    pub tags: BTreeSet<String>,
    /// Precomputed embedding; skips the provider call
    pub embedding: Option<Vec<f32>>,
}

impl SemanticSetOptions {
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

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// A successful semantic lookup
#[derive(Debug, Clone)]
pub struct SemanticMatch {
    pub key: String,
    pub value: serde_json::Value,
    /// 1.0 for an exact key match
    pub similarity: f32,
    pub exact: bool,
}

/// Outcome of `get_or_set`
#[derive(Debug, Clone)]
pub struct GetOrSetResult {
    pub value: serde_json::Value,
    /// True when the value came from the cache rather than the compute function
    pub cached: bool,
    pub similarity: Option<f32>,
}

/// Statistics for the semantic cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemanticCacheStats {
    pub entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub exact_hits: u64,
    pub similar_hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub errors: u64,
    /// Average similarity of hits
    pub avg_hit_similarity: f32,
    pub remote_available: bool,
}

impl SemanticCacheStats {
    /// Calculate hit rate
    pub fn hit_rate(&self) -> f32 {
        let total = self.hits + self.misses;

        if total == 0 {
            return 0.0;
        }

        self.hits as f32 / total as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_without_ttl_never_expires() {
        let entry = CacheEntry::new("k", "q", &json!({"a": 1}), vec![1.0], None).unwrap();
        let far_future = Utc::now() + chrono::Duration::days(3650);

        assert!(!entry.is_expired_at(far_future));
        assert_eq!(entry.remaining_ttl(far_future), None);
        assert_eq!(entry.expires_at(), None);
    }

    #[test]
    fn test_entry_expiry_derived_from_creation() {
        let entry = CacheEntry::new("k", "q", &json!(1), vec![1.0], Some(Duration::from_secs(60)))
            .unwrap();
        let created = EvictionCandidate::created_at(&entry);

        assert!(!entry.is_expired_at(created + chrono::Duration::seconds(59)));
        assert!(entry.is_expired_at(created + chrono::Duration::seconds(60)));
        assert_eq!(
            entry.remaining_ttl(created + chrono::Duration::seconds(90)),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_fractional_ttl_is_kept_to_the_millisecond() {
        let entry =
            CacheEntry::new("k", "q", &json!(1), vec![1.0], Some(Duration::from_millis(1500)))
                .unwrap();
        let created = EvictionCandidate::created_at(&entry);

        assert_eq!(entry.ttl(), Some(Duration::from_millis(1500)));
        assert!(!entry.is_expired_at(created + chrono::Duration::milliseconds(1499)));
        assert!(entry.is_expired_at(created + chrono::Duration::milliseconds(1500)));
    }

    #[test]
    fn test_touch_updates_access_metadata() {
        let mut entry = CacheEntry::new("k", "q", &json!("v"), vec![1.0], None).unwrap();
        entry.stamp(3);
        let later = Utc::now() + chrono::Duration::seconds(5);
        entry.touch(7, later);

        assert_eq!(entry.access_count(), 1);
        assert_eq!(entry.last_accessed(), later);
        assert_eq!(entry.insert_seq(), 3);
        assert_eq!(entry.touch_seq(), 7);
    }

    #[test]
    fn test_value_round_trips_through_json_text() {
        let value = json!({"action": "reset", "steps": [1, 2]});
        let entry = CacheEntry::new("k", "q", &value, vec![0.5], None).unwrap();

        assert_eq!(entry.value::<serde_json::Value>().unwrap(), value);
    }

    #[test]
    fn test_stats_hit_rate() {
        let stats = SemanticCacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < 0.001);
        assert_eq!(SemanticCacheStats::default().hit_rate(), 0.0);
    }
}
