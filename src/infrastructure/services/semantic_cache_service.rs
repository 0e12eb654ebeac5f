//! Semantic result caching service
//!
//! Looks up cached values by embedding similarity across two tiers: an
//! in-process map guarded by a single lock, and an optional persistent
//! store mirror shared with other processes.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use super::remote_tier::RemoteTier;
use crate::domain::analytics::{CacheEvent, CacheEventKind, CacheEventSink};
use crate::domain::cache::{CacheKeyGenerator, EvictionCandidate};
use crate::domain::embedding::EmbeddingProvider;
use crate::domain::semantic_cache::{
    CacheEntry, GetOrSetResult, SemanticCacheConfig, SemanticCacheStats, SemanticMatch,
    SemanticSetOptions,
};
use crate::domain::store::{scan_all, PersistentStore, Serializer, SetOptions, DEFAULT_SCAN_COUNT};
use crate::domain::{DomainError, HealthReport};

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    exact_hits: u64,
    similar_hits: u64,
    misses: u64,
    sets: u64,
    evictions: u64,
    expirations: u64,
    errors: u64,
    similarity_sum: f64,
}

#[derive(Debug, Default)]
struct SemanticState {
    entries: HashMap<String, CacheEntry>,
    /// Logical clock for insertion and touch ordering
    clock: u64,
    counters: Counters,
}

impl SemanticState {
    fn next_seq(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// A candidate picked by a lookup
struct Found {
    key: String,
    similarity: f32,
    exact: bool,
}

/// Semantic cache over an embedding provider and an optional persistent store
pub struct SemanticCacheService {
    name: String,
    config: SemanticCacheConfig,
    keys: CacheKeyGenerator,
    embedder: Arc<dyn EmbeddingProvider>,
    serializer: Serializer,
    remote: Option<RemoteTier>,
    state: Mutex<SemanticState>,
    events: Option<Arc<dyn CacheEventSink>>,
}

impl std::fmt::Debug for SemanticCacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticCacheService")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("embedder", &self.embedder.provider_name())
            .field("remote", &self.remote.is_some())
            .finish()
    }
}

impl SemanticCacheService {
    pub fn new(
        name: impl Into<String>,
        config: SemanticCacheConfig,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, DomainError> {
        config.validate()?;

        let keys = CacheKeyGenerator::new(config.key_prefix.clone())
            .with_num_buckets(config.num_buckets);

        Ok(Self {
            name: name.into(),
            config,
            keys,
            embedder,
            serializer: Serializer::default(),
            remote: None,
            state: Mutex::new(SemanticState::default()),
            events: None,
        })
    }

    /// Mirrors entries to `store` when persistence is enabled in the config
    pub fn with_store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        if self.config.enable_persistence {
            self.remote = Some(RemoteTier::new(self.name.clone(), store));
        }
        self
    }

    pub fn with_serializer(mut self, serializer: Serializer) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn CacheEventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SemanticCacheConfig {
        &self.config
    }

    /// Entries currently held in memory
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Looks up `query`, embedding it first
    pub async fn get(&self, query: &str) -> Result<Option<SemanticMatch>, DomainError> {
        let embedding = self.embed(query).await?;
        self.lookup(query, embedding).await
    }

    /// Looks up `query` with a precomputed embedding
    pub async fn get_with_embedding(
        &self,
        query: &str,
        embedding: Vec<f32>,
    ) -> Result<Option<SemanticMatch>, DomainError> {
        self.lookup(query, embedding).await
    }

    /// Stores `value` under `query`; returns the semantic key
    pub async fn set(
        &self,
        query: &str,
        value: &serde_json::Value,
        options: SemanticSetOptions,
    ) -> Result<String, DomainError> {
        let ttl = if options.no_expiry {
            None
        } else {
            options.ttl.or_else(|| self.config.default_ttl())
        };

        let embedding = match options.embedding {
            Some(embedding) => embedding,
            None => self.embed(query).await?,
        };

        let key = self.keys.semantic_key(&embedding, Some(query));
        let entry = CacheEntry::new(key.clone(), query, value, embedding, ttl)?
            .with_tags(options.tags);
        let ttl = entry.ttl();

        let payload = match self.remote {
            Some(_) => Some(self.serializer.encode(&entry)?),
            None => None,
        };

        let (evicted, entries) = {
            let mut state = self.state.lock().await;
            let evicted = self.insert(&mut state, entry, Utc::now());
            state.counters.sets += 1;
            (evicted, state.entries.len())
        };

        for _ in 0..evicted {
            self.emit(CacheEventKind::Eviction, None);
        }
        self.report_size(entries);

        if let (Some(remote), Some(payload)) = (&self.remote, payload) {
            remote.absorb(
                "set",
                remote
                    .store()
                    .set(&key, &payload, SetOptions::new().with_ttl(ttl))
                    .await,
            );
        }

        debug!(cache = %self.name, key = %key, "Cached semantic entry");

        Ok(key)
    }

    /// Returns the cached value for `query`, or computes and stores it
    pub async fn get_or_set<F, Fut>(
        &self,
        query: &str,
        compute: F,
        options: SemanticSetOptions,
    ) -> Result<GetOrSetResult, DomainError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<serde_json::Value, DomainError>>,
    {
        let embedding = match &options.embedding {
            Some(embedding) => embedding.clone(),
            None => self.embed(query).await?,
        };

        if let Some(hit) = self.lookup(query, embedding.clone()).await? {
            return Ok(GetOrSetResult {
                value: hit.value,
                cached: true,
                similarity: Some(hit.similarity),
            });
        }

        let value = compute().await?;

        self.set(
            query,
            &value,
            SemanticSetOptions {
                embedding: Some(embedding),
                ..options
            },
        )
        .await?;

        Ok(GetOrSetResult {
            value,
            cached: false,
            similarity: None,
        })
    }

    /// Removes the entry stored under exactly this query from both tiers
    pub async fn invalidate(&self, query: &str) -> Result<bool, DomainError> {
        let embedding = self.embed(query).await?;
        let key = self.keys.semantic_key(&embedding, Some(query));

        let (removed, entries) = {
            let mut state = self.state.lock().await;
            let removed = state.entries.remove(&key).is_some();
            (removed, state.entries.len())
        };
        self.report_size(entries);

        let remote_removed = match &self.remote {
            Some(remote) => remote
                .absorb("delete", remote.store().delete(std::slice::from_ref(&key)).await)
                .unwrap_or(0),
            None => 0,
        };

        Ok(removed || remote_removed > 0)
    }

    /// Removes every entry carrying `tag` from both tiers; returns the number of keys removed
    pub async fn invalidate_by_tag(&self, tag: &str) -> Result<usize, DomainError> {
        let mut removed: HashSet<String> = HashSet::new();

        let entries = {
            let mut state = self.state.lock().await;
            state.entries.retain(|key, entry| {
                if entry.has_tag(tag) {
                    removed.insert(key.clone());
                    false
                } else {
                    true
                }
            });
            state.entries.len()
        };
        self.report_size(entries);

        if let Some(remote) = &self.remote {
            removed.extend(self.invalidate_remote_tag(remote, tag).await);
        }

        debug!(cache = %self.name, tag, removed = removed.len(), "Invalidated by tag");

        Ok(removed.len())
    }

    /// Empties both tiers
    pub async fn clear(&self) -> Result<(), DomainError> {
        self.state.lock().await.entries.clear();
        self.report_size(0);

        if let Some(remote) = &self.remote {
            remote.absorb(
                "delete_pattern",
                remote
                    .store()
                    .delete_pattern(&self.keys.prefix_pattern())
                    .await,
            );
        }

        Ok(())
    }

    /// Drops expired entries from memory; returns how many were removed
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();

        let (purged, entries) = {
            let mut state = self.state.lock().await;
            let before = state.entries.len();
            state.entries.retain(|_, entry| !entry.is_expired_at(now));
            let purged = before - state.entries.len();
            state.counters.expirations += purged as u64;
            (purged, state.entries.len())
        };

        for _ in 0..purged {
            self.emit(CacheEventKind::Expiration, None);
        }
        if purged > 0 {
            self.report_size(entries);
        }

        purged
    }

    pub async fn stats(&self) -> SemanticCacheStats {
        let state = self.state.lock().await;
        let counters = &state.counters;

        SemanticCacheStats {
            entries: state.entries.len(),
            max_entries: self.config.max_entries,
            hits: counters.hits,
            exact_hits: counters.exact_hits,
            similar_hits: counters.similar_hits,
            misses: counters.misses,
            sets: counters.sets,
            evictions: counters.evictions,
            expirations: counters.expirations,
            errors: counters.errors,
            avg_hit_similarity: if counters.hits == 0 {
                0.0
            } else {
                (counters.similarity_sum / counters.hits as f64) as f32
            },
            remote_available: self.remote.as_ref().is_some_and(RemoteTier::is_available),
        }
    }

    /// Healthy while memory serves; degraded when the remote tier is down
    pub async fn health(&self) -> HealthReport {
        let entries = self.len().await;

        let Some(remote) = &self.remote else {
            return HealthReport::healthy()
                .with_detail("entries", entries)
                .with_detail("persistence", "disabled");
        };

        let store = remote.health().await;
        let mut report = if store.is_healthy() {
            HealthReport::healthy()
        } else {
            HealthReport::degraded("remote tier unavailable, serving from memory")
        }
        .with_detail("entries", entries)
        .with_detail("store.status", store.status);

        for (key, value) in store.details {
            report = report.with_detail(format!("store.{}", key), value);
        }

        report
    }

    async fn embed(&self, query: &str) -> Result<Vec<f32>, DomainError> {
        match self.embedder.embed(query).await {
            Ok(embedding) => Ok(embedding),
            Err(e) => {
                self.state.lock().await.counters.errors += 1;
                self.emit(CacheEventKind::Error, None);
                Err(e)
            }
        }
    }

    async fn lookup(
        &self,
        query: &str,
        embedding: Vec<f32>,
    ) -> Result<Option<SemanticMatch>, DomainError> {
        let started = Instant::now();
        let key = self.keys.semantic_key(&embedding, Some(query));
        let buckets = self.candidate_buckets(&embedding);

        {
            let mut state = self.state.lock().await;
            let now = Utc::now();
            let (found, expired) = self.find_in_memory(&mut state, &key, &buckets, &embedding, now);

            for _ in 0..expired {
                self.emit(CacheEventKind::Expiration, None);
            }
            if expired > 0 {
                self.report_size(state.entries.len());
            }

            if let Some(found) = found {
                let hit = self.promote_hit(&mut state, found, now)?;
                drop(state);
                self.emit(CacheEventKind::Hit, Some(started));
                return Ok(Some(hit));
            }
        }

        if let Some(remote) = &self.remote {
            if let Some((entry, similarity, exact)) =
                self.find_in_remote(remote, &key, &embedding).await?
            {
                let now = Utc::now();
                let found = Found {
                    key: entry.key().to_string(),
                    similarity,
                    exact,
                };

                let (hit, evicted, entries) = {
                    let mut state = self.state.lock().await;
                    let evicted = if state.entries.contains_key(&found.key) {
                        0
                    } else {
                        self.insert(&mut state, entry, now)
                    };
                    let hit = self.promote_hit(&mut state, found, now)?;
                    (hit, evicted, state.entries.len())
                };

                for _ in 0..evicted {
                    self.emit(CacheEventKind::Eviction, None);
                }
                self.report_size(entries);
                self.emit(CacheEventKind::Hit, Some(started));

                debug!(cache = %self.name, key = %hit.key, "Promoted entry from remote tier");

                return Ok(Some(hit));
            }
        }

        self.state.lock().await.counters.misses += 1;
        self.emit(CacheEventKind::Miss, Some(started));

        debug!(cache = %self.name, "Semantic cache miss");

        Ok(None)
    }

    /// Bucket key prefixes searched for near matches, nearest first
    fn candidate_buckets(&self, embedding: &[f32]) -> Vec<String> {
        self.keys
            .neighbouring_buckets(self.keys.bucket_for(embedding), self.config.bucket_radius)
            .into_iter()
            .map(|bucket| format!("{}:", self.keys.bucket_prefix(bucket)))
            .collect()
    }

    /// Exact key first, then the best qualifying entry in the candidate
    /// buckets; expired entries met on the way are dropped
    fn find_in_memory(
        &self,
        state: &mut SemanticState,
        key: &str,
        buckets: &[String],
        embedding: &[f32],
        now: DateTime<Utc>,
    ) -> (Option<Found>, usize) {
        let mut expired = Vec::new();
        let mut best: Option<Found> = None;

        match state.entries.get(key) {
            Some(entry) if entry.is_expired_at(now) => expired.push(key.to_string()),
            Some(_) => {
                best = Some(Found {
                    key: key.to_string(),
                    similarity: 1.0,
                    exact: true,
                })
            }
            None => {}
        }

        if best.is_none() {
            for (candidate, entry) in &state.entries {
                // The exact key was already checked above
                if candidate == key || !buckets.iter().any(|bucket| candidate.starts_with(bucket)) {
                    continue;
                }

                if entry.is_expired_at(now) {
                    expired.push(candidate.clone());
                    continue;
                }

                let similarity = self.embedder.similarity(embedding, entry.embedding());

                if similarity >= self.config.similarity_threshold
                    && best.as_ref().is_none_or(|b| similarity > b.similarity)
                {
                    best = Some(Found {
                        key: candidate.clone(),
                        similarity,
                        exact: false,
                    });
                }
            }
        }

        for key in &expired {
            state.entries.remove(key);
        }
        state.counters.expirations += expired.len() as u64;

        (best, expired.len())
    }

    async fn find_in_remote(
        &self,
        remote: &RemoteTier,
        key: &str,
        embedding: &[f32],
    ) -> Result<Option<(CacheEntry, f32, bool)>, DomainError> {
        let now = Utc::now();

        let Some(exact) = remote.absorb("get", remote.store().get(key).await) else {
            return Ok(None);
        };

        if let Some(bytes) = exact {
            let entry: CacheEntry = self.serializer.decode(&bytes)?;
            if !entry.is_expired_at(now) {
                return Ok(Some((entry, 1.0, true)));
            }
        }

        let mut best: Option<(CacheEntry, f32, bool)> = None;

        for bucket in self
            .keys
            .neighbouring_buckets(self.keys.bucket_for(embedding), self.config.bucket_radius)
        {
            let pattern = self.keys.bucket_pattern(bucket);
            let Some(keys) = remote.absorb(
                "scan",
                scan_all(
                    remote.store(),
                    &pattern,
                    Some(self.config.max_remote_candidates),
                )
                .await,
            ) else {
                break;
            };

            if keys.is_empty() {
                continue;
            }

            let Some(records) = remote.absorb("multi_get", remote.store().multi_get(&keys).await)
            else {
                break;
            };

            for bytes in records.values() {
                let entry: CacheEntry = self.serializer.decode(bytes)?;

                if entry.is_expired_at(now) {
                    continue;
                }

                let similarity = self.embedder.similarity(embedding, entry.embedding());

                if similarity >= self.config.similarity_threshold
                    && best.as_ref().is_none_or(|(_, s, _)| similarity > *s)
                {
                    best = Some((entry, similarity, false));
                }
            }
        }

        Ok(best)
    }

    async fn invalidate_remote_tag(&self, remote: &RemoteTier, tag: &str) -> Vec<String> {
        let Some(keys) = remote.absorb(
            "scan",
            scan_all(remote.store(), &self.keys.prefix_pattern(), None).await,
        ) else {
            return Vec::new();
        };

        let mut removed = Vec::new();

        for chunk in keys.chunks(DEFAULT_SCAN_COUNT) {
            let Some(records) = remote.absorb("multi_get", remote.store().multi_get(chunk).await)
            else {
                break;
            };

            let tagged: Vec<String> = records
                .into_iter()
                .filter_map(|(key, bytes)| match self.serializer.decode::<CacheEntry>(&bytes) {
                    Ok(entry) if entry.has_tag(tag) => Some(key),
                    Ok(_) => None,
                    Err(e) => {
                        warn!(cache = %self.name, key = %key, error = %e, "Skipping undecodable record");
                        None
                    }
                })
                .collect();

            if tagged.is_empty() {
                continue;
            }

            if remote
                .absorb("delete", remote.store().delete(&tagged).await)
                .is_none()
            {
                break;
            }

            removed.extend(tagged);
        }

        removed
    }

    /// Makes room and inserts; returns the number of entries evicted
    fn insert(&self, state: &mut SemanticState, mut entry: CacheEntry, now: DateTime<Utc>) -> usize {
        let key = entry.key().to_string();
        let mut evicted = 0;

        if !state.entries.contains_key(&key) {
            let outcome = self.config.eviction_policy.make_room(
                &mut state.entries,
                self.config.max_entries,
                1,
                now,
            );

            if !outcome.room_made {
                error!(
                    cache = %self.name,
                    max_entries = self.config.max_entries,
                    entries = state.entries.len(),
                    "Eviction could not free capacity; inserting anyway"
                );
            }

            for (victim, entry) in &outcome.evicted {
                debug!(
                    cache = %self.name,
                    key = %victim,
                    access_count = entry.access_count(),
                    policy = %self.config.eviction_policy,
                    "Evicted semantic entry"
                );
            }

            evicted = outcome.evicted.len();
            state.counters.evictions += evicted as u64;
        }

        let seq = state.next_seq();
        entry.stamp(seq);
        state.entries.insert(key, entry);

        evicted
    }

    fn promote_hit(
        &self,
        state: &mut SemanticState,
        found: Found,
        now: DateTime<Utc>,
    ) -> Result<SemanticMatch, DomainError> {
        let seq = state.next_seq();

        let entry = state
            .entries
            .get_mut(&found.key)
            .ok_or_else(|| DomainError::internal("Matched entry vanished under lock"))?;
        entry.touch(seq, now);
        let value = entry.value::<serde_json::Value>()?;

        state.counters.hits += 1;
        state.counters.similarity_sum += found.similarity as f64;
        if found.exact {
            state.counters.exact_hits += 1;
        } else {
            state.counters.similar_hits += 1;
        }

        debug!(
            cache = %self.name,
            key = %found.key,
            similarity = found.similarity,
            exact = found.exact,
            "Semantic cache hit"
        );

        Ok(SemanticMatch {
            key: found.key,
            value,
            similarity: found.similarity,
            exact: found.exact,
        })
    }

    fn emit(&self, kind: CacheEventKind, started: Option<Instant>) {
        if let Some(sink) = &self.events {
            let mut event = CacheEvent::new(self.name.clone(), kind);
            if let Some(started) = started {
                event = event.with_latency(started.elapsed());
            }
            sink.record(event);
        }
    }

    fn report_size(&self, entries: usize) {
        if let Some(sink) = &self.events {
            sink.record_entry_count(&self.name, entries);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cache::EvictionPolicy;
    use crate::domain::embedding::MockEmbeddingProvider;
    use crate::domain::store::MockPersistentStore;
    use crate::infrastructure::embedding::HashEmbeddingProvider;
    use crate::infrastructure::store::InMemoryStore;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        events: std::sync::Mutex<Vec<CacheEventKind>>,
        sizes: std::sync::Mutex<Vec<usize>>,
    }

    impl RecordingSink {
        fn count(&self, kind: CacheEventKind) -> usize {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|k| **k == kind)
                .count()
        }
    }

    impl CacheEventSink for RecordingSink {
        fn record(&self, event: CacheEvent) {
            self.events.lock().unwrap().push(event.kind);
        }

        fn record_entry_count(&self, _cache_name: &str, entries: usize) {
            self.sizes.lock().unwrap().push(entries);
        }
    }

    fn hash_provider() -> Arc<dyn EmbeddingProvider> {
        Arc::new(HashEmbeddingProvider::new(128).with_seed(42))
    }

    fn memory_only(config: SemanticCacheConfig) -> SemanticCacheService {
        SemanticCacheService::new("semantic", config.with_persistence(false), hash_provider())
            .unwrap()
    }

    fn orthogonal_provider() -> Arc<dyn EmbeddingProvider> {
        Arc::new(
            MockEmbeddingProvider::new(4)
                .with_vector("k1", vec![1.0, 0.0, 0.0, 0.0])
                .with_vector("k2", vec![0.0, 1.0, 0.0, 0.0])
                .with_vector("k3", vec![0.0, 0.0, 1.0, 0.0])
                .with_vector("k4", vec![0.0, 0.0, 0.0, 1.0]),
        )
    }

    #[tokio::test]
    async fn test_exact_match_and_unrelated_miss() {
        let cache = memory_only(SemanticCacheConfig::new().with_similarity_threshold(0.85));

        cache
            .set(
                "How do I reset my password?",
                &serde_json::json!({"action": "reset"}),
                SemanticSetOptions::new(),
            )
            .await
            .unwrap();

        let hit = cache.get("How do I reset my password?").await.unwrap().unwrap();
        assert_eq!(hit.value, serde_json::json!({"action": "reset"}));
        assert!((hit.similarity - 1.0).abs() < 1e-6);
        assert!(hit.exact);

        assert!(cache.get("completely unrelated text").await.unwrap().is_none());

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_near_match_above_threshold() {
        let cache = memory_only(SemanticCacheConfig::new().with_similarity_threshold(0.85));

        cache
            .set(
                "How do I reset my password?",
                &serde_json::json!("reset"),
                SemanticSetOptions::new(),
            )
            .await
            .unwrap();

        let hit = cache.get("how do i reset my password").await.unwrap().unwrap();
        assert!(!hit.exact);
        assert!(hit.similarity > 0.99);
        assert_eq!(cache.stats().await.similar_hits, 1);
    }

    #[tokio::test]
    async fn test_threshold_filters_near_matches() {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(
            MockEmbeddingProvider::new(2)
                .with_vector("stored", vec![1.0, 0.0])
                .with_vector("close", vec![0.8, 0.6])
                .with_vector("far", vec![0.6, 0.8]),
        );
        let cache = SemanticCacheService::new(
            "semantic",
            SemanticCacheConfig::new()
                .with_similarity_threshold(0.75)
                .with_persistence(false)
                .with_num_buckets(1),
            embedder,
        )
        .unwrap();

        cache
            .set("stored", &serde_json::json!(1), SemanticSetOptions::new())
            .await
            .unwrap();

        let close = cache.get("close").await.unwrap().unwrap();
        assert!((close.similarity - 0.8).abs() < 1e-6);
        assert!(cache.get("far").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recency_eviction_removes_true_lru() {
        let cache = SemanticCacheService::new(
            "semantic",
            SemanticCacheConfig::new()
                .with_max_entries(3)
                .with_eviction_policy(EvictionPolicy::Recency)
                .with_persistence(false),
            orthogonal_provider(),
        )
        .unwrap();

        for key in ["k1", "k2", "k3"] {
            cache
                .set(key, &serde_json::json!(key), SemanticSetOptions::new())
                .await
                .unwrap();
        }

        assert!(cache.get("k1").await.unwrap().is_some());

        cache
            .set("k4", &serde_json::json!("k4"), SemanticSetOptions::new())
            .await
            .unwrap();

        assert_eq!(cache.len().await, 3);
        assert!(cache.get("k2").await.unwrap().is_none());
        assert!(cache.get("k1").await.unwrap().is_some());
        assert!(cache.get("k3").await.unwrap().is_some());
        assert!(cache.get("k4").await.unwrap().is_some());
        assert_eq!(cache.stats().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_memory_never_exceeds_max_entries() {
        let cache = memory_only(SemanticCacheConfig::new().with_max_entries(5));

        for i in 0..20 {
            cache
                .set(
                    &format!("distinct question number {}", i),
                    &serde_json::json!(i),
                    SemanticSetOptions::new(),
                )
                .await
                .unwrap();
            assert!(cache.len().await <= 5);
        }

        assert_eq!(cache.stats().await.evictions, 15);
    }

    #[tokio::test]
    async fn test_expired_entry_is_dropped_on_access() {
        let sink = Arc::new(RecordingSink::default());
        let cache = memory_only(SemanticCacheConfig::new()).with_event_sink(sink.clone());

        cache
            .set(
                "short lived",
                &serde_json::json!(true),
                SemanticSetOptions::new().with_ttl(Duration::from_secs(1)),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert!(cache.get("short lived").await.unwrap().is_none());
        assert!(cache.is_empty().await);
        assert_eq!(cache.stats().await.expirations, 1);
        assert_eq!(sink.count(CacheEventKind::Expiration), 1);
        assert_eq!(sink.count(CacheEventKind::Miss), 1);
    }

    #[tokio::test]
    async fn test_entry_without_expiry_survives_default_ttl() {
        let cache = memory_only(
            SemanticCacheConfig::new().with_default_ttl(Some(Duration::from_secs(1))),
        );

        cache
            .set(
                "forever",
                &serde_json::json!(1),
                SemanticSetOptions::new().without_expiry(),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(cache.get("forever").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_remote_hit_is_promoted_to_memory() {
        let store: Arc<dyn PersistentStore> = Arc::new(InMemoryStore::new());

        let writer = SemanticCacheService::new("semantic", SemanticCacheConfig::new(), hash_provider())
            .unwrap()
            .with_store(store.clone());
        writer
            .set("shared question", &serde_json::json!("answer"), SemanticSetOptions::new())
            .await
            .unwrap();

        let reader = SemanticCacheService::new("semantic", SemanticCacheConfig::new(), hash_provider())
            .unwrap()
            .with_store(store);
        assert!(reader.is_empty().await);

        let hit = reader.get("shared question").await.unwrap().unwrap();
        assert_eq!(hit.value, serde_json::json!("answer"));
        assert!(hit.exact);
        assert_eq!(reader.len().await, 1);
    }

    #[tokio::test]
    async fn test_remote_near_match_from_bucket_scan() {
        let store: Arc<dyn PersistentStore> = Arc::new(InMemoryStore::new());

        let writer = SemanticCacheService::new("semantic", SemanticCacheConfig::new(), hash_provider())
            .unwrap()
            .with_store(store.clone());
        writer
            .set("What are your opening hours?", &serde_json::json!("9-5"), SemanticSetOptions::new())
            .await
            .unwrap();

        let reader = SemanticCacheService::new("semantic", SemanticCacheConfig::new(), hash_provider())
            .unwrap()
            .with_store(store);

        let hit = reader.get("what are your opening hours").await.unwrap().unwrap();
        assert!(!hit.exact);
        assert_eq!(hit.value, serde_json::json!("9-5"));
    }

    #[tokio::test]
    async fn test_invalidate_by_tag_covers_both_tiers() {
        let store: Arc<dyn PersistentStore> = Arc::new(InMemoryStore::new());
        let cache = SemanticCacheService::new("semantic", SemanticCacheConfig::new(), hash_provider())
            .unwrap()
            .with_store(store.clone());

        cache
            .set("refund policy", &serde_json::json!(1), SemanticSetOptions::new().with_tag("faq"))
            .await
            .unwrap();
        cache
            .set("shipping times", &serde_json::json!(2), SemanticSetOptions::new().with_tag("faq"))
            .await
            .unwrap();
        cache
            .set("billing address", &serde_json::json!(3), SemanticSetOptions::new().with_tag("account"))
            .await
            .unwrap();

        assert_eq!(cache.invalidate_by_tag("faq").await.unwrap(), 2);
        assert_eq!(cache.len().await, 1);

        let remaining = scan_all(store.as_ref(), "semantic:*", None).await.unwrap();
        assert_eq!(remaining.len(), 1);

        let fresh = SemanticCacheService::new("semantic", SemanticCacheConfig::new(), hash_provider())
            .unwrap()
            .with_store(store);
        assert!(fresh.get("refund policy").await.unwrap().is_none());
        assert!(fresh.get("billing address").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let store: Arc<dyn PersistentStore> = Arc::new(InMemoryStore::new());
        let cache = SemanticCacheService::new("semantic", SemanticCacheConfig::new(), hash_provider())
            .unwrap()
            .with_store(store.clone());

        cache
            .set("first question", &serde_json::json!(1), SemanticSetOptions::new())
            .await
            .unwrap();
        cache
            .set("second question", &serde_json::json!(2), SemanticSetOptions::new())
            .await
            .unwrap();

        assert!(cache.invalidate("first question").await.unwrap());
        assert!(!cache.invalidate("first question").await.unwrap());
        assert_eq!(cache.len().await, 1);

        cache.clear().await.unwrap();
        assert!(cache.is_empty().await);
        assert!(scan_all(store.as_ref(), "semantic:*", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remote_outage_degrades_to_memory() {
        let mut store = MockPersistentStore::new();
        store
            .expect_set()
            .returning(|_, _, _| Err(DomainError::connection("connection refused")));
        store
            .expect_get()
            .returning(|_| Err(DomainError::connection("connection refused")));
        store
            .expect_scan()
            .returning(|_, _, _| Err(DomainError::connection("connection refused")));

        let cache = SemanticCacheService::new("semantic", SemanticCacheConfig::new(), hash_provider())
            .unwrap()
            .with_store(Arc::new(store));

        cache
            .set("cached locally", &serde_json::json!("ok"), SemanticSetOptions::new())
            .await
            .unwrap();

        assert!(cache.get("cached locally").await.unwrap().is_some());
        assert!(cache.get("never stored anywhere").await.unwrap().is_none());

        let stats = cache.stats().await;
        assert!(!stats.remote_available);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_health_reports_degraded_remote() {
        let mut store = MockPersistentStore::new();
        store
            .expect_health_check()
            .returning(|| HealthReport::unhealthy("connection refused"));

        let cache = SemanticCacheService::new("semantic", SemanticCacheConfig::new(), hash_provider())
            .unwrap()
            .with_store(Arc::new(store));

        let report = cache.health().await;
        assert_eq!(report.status, crate::domain::HealthStatus::Degraded);
        assert_eq!(report.details.get("store.status").map(String::as_str), Some("unhealthy"));
    }

    #[tokio::test]
    async fn test_embedding_error_propagates() {
        let cache = SemanticCacheService::new(
            "semantic",
            SemanticCacheConfig::new().with_persistence(false),
            Arc::new(MockEmbeddingProvider::new(4).with_error("quota exceeded")),
        )
        .unwrap();

        let result = cache.get("anything").await;
        assert!(matches!(result, Err(DomainError::Embedding { .. })));
        assert_eq!(cache.stats().await.errors, 1);
    }

    #[tokio::test]
    async fn test_get_or_set_computes_once() {
        let cache = memory_only(SemanticCacheConfig::new());
        let counter = std::sync::atomic::AtomicUsize::new(0);
        let calls = &counter;

        let compute = move || async move {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(serde_json::json!({"answer": 42}))
        };

        let first = cache
            .get_or_set("meaning of life", compute, SemanticSetOptions::new())
            .await
            .unwrap();
        assert!(!first.cached);

        let second = cache
            .get_or_set("meaning of life", compute, SemanticSetOptions::new())
            .await
            .unwrap();
        assert!(second.cached);
        assert_eq!(second.value, serde_json::json!({"answer": 42}));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_compute_error_is_not_cached() {
        let cache = memory_only(SemanticCacheConfig::new());

        let result = cache
            .get_or_set(
                "fails",
                || async { Err(DomainError::compute("upstream timeout")) },
                SemanticSetOptions::new(),
            )
            .await;

        assert!(matches!(result, Err(DomainError::Compute { .. })));
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_events_reach_sink() {
        let sink = Arc::new(RecordingSink::default());
        let cache = SemanticCacheService::new(
            "faq",
            SemanticCacheConfig::new()
                .with_max_entries(1)
                .with_persistence(false),
            orthogonal_provider(),
        )
        .unwrap()
        .with_event_sink(sink.clone());

        cache.set("k1", &serde_json::json!(1), SemanticSetOptions::new()).await.unwrap();
        cache.get("k1").await.unwrap();
        cache.get("k2").await.unwrap();
        cache.set("k3", &serde_json::json!(3), SemanticSetOptions::new()).await.unwrap();

        assert_eq!(sink.count(CacheEventKind::Hit), 1);
        assert_eq!(sink.count(CacheEventKind::Miss), 1);
        assert_eq!(sink.count(CacheEventKind::Eviction), 1);
        assert_eq!(sink.sizes.lock().unwrap().last(), Some(&1));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = SemanticCacheService::new(
            "semantic",
            SemanticCacheConfig::new().with_max_entries(0),
            hash_provider(),
        );
        assert!(matches!(result, Err(DomainError::Validation { .. })));
    }
}
