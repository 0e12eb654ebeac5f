//! Structured query result caching service
//!
//! Results are keyed by normalized query and parameters, deduplicated by
//! fingerprint, compressed when large, and mirrored to the persistent store.
//! Registered warming tasks recompute results and write them back through
//! `set`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::remote_tier::RemoteTier;
use crate::domain::analytics::{CacheEvent, CacheEventKind, CacheEventSink};
use crate::domain::cache::{CacheKeyGenerator, EvictionCandidate};
use crate::domain::query_cache::{
    by_priority, ComputeFn, DedupStrategy, QueryCacheConfig, QueryCacheStats, QueryResult,
    QuerySetOptions, SetOutcome, StoredQuery, WarmingRunSummary, WarmingStats, WarmingTask,
};
use crate::domain::store::{scan_all, PersistentStore, Serializer, SetOptions, DEFAULT_SCAN_COUNT};
use crate::domain::{DomainError, HealthReport};

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    insertions: u64,
    deduplicated: u64,
    evictions: u64,
    expirations: u64,
    refreshes: u64,
}

#[derive(Debug, Default)]
struct QueryState {
    entries: HashMap<String, QueryResult>,
    /// Deduplicated key -> key holding the shared result
    aliases: HashMap<String, String>,
    /// Keys with a background refresh in flight
    refreshing: HashSet<String>,
    clock: u64,
    counters: Counters,
}

impl QueryState {
    fn next_seq(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn canonical_key(&self, key: &str) -> String {
        self.aliases
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }

    /// Removes an entry and every alias pointing at it; returns the removed alias keys
    fn remove_entry(&mut self, key: &str) -> Vec<String> {
        self.entries.remove(key);

        let aliases: Vec<String> = self
            .aliases
            .iter()
            .filter(|(_, canonical)| canonical.as_str() == key)
            .map(|(alias, _)| alias.clone())
            .collect();

        for alias in &aliases {
            self.aliases.remove(alias);
        }

        aliases
    }
}

/// How an incoming result relates to what is already cached
enum Duplicate {
    /// The key already holds identical content
    SameKey,
    /// Another key holds an equivalent result
    Other(String),
}

/// Query result cache over an optional persistent store
pub struct QueryCacheService {
    name: String,
    config: QueryCacheConfig,
    keys: CacheKeyGenerator,
    serializer: Serializer,
    remote: Option<RemoteTier>,
    state: Mutex<QueryState>,
    tasks: Mutex<Vec<WarmingTask>>,
    warming: std::sync::Mutex<WarmingStats>,
    errors: AtomicU64,
    events: Option<Arc<dyn CacheEventSink>>,
}

impl std::fmt::Debug for QueryCacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCacheService")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("remote", &self.remote.is_some())
            .finish()
    }
}

impl QueryCacheService {
    pub fn new(name: impl Into<String>, config: QueryCacheConfig) -> Result<Self, DomainError> {
        config.validate()?;

        let keys = CacheKeyGenerator::new(config.key_prefix.clone());

        Ok(Self {
            name: name.into(),
            config,
            keys,
            serializer: Serializer::default(),
            remote: None,
            state: Mutex::new(QueryState::default()),
            tasks: Mutex::new(Vec::new()),
            warming: std::sync::Mutex::new(WarmingStats::default()),
            errors: AtomicU64::new(0),
            events: None,
        })
    }

    /// Mirrors results to `store` when persistence is enabled in the config
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

    pub fn config(&self) -> &QueryCacheConfig {
        &self.config
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Key a query and its parameters are stored under
    pub fn key_for(&self, query: &str, params: &serde_json::Value) -> Result<String, DomainError> {
        self.keys.query_key(query, params)
    }

    pub async fn get(
        &self,
        query: &str,
        params: &serde_json::Value,
    ) -> Result<Option<serde_json::Value>, DomainError> {
        let key = self.keys.query_key(query, params)?;

        match self.lookup(&key).await? {
            Some(record) => Ok(Some(self.decode_value(&record)?)),
            None => Ok(None),
        }
    }

    /// Serves the cached value and, when its remaining lifetime fraction is
    /// below `refresh_threshold`, recomputes it in the background; on a miss
    /// computes and stores it inline
    pub async fn get_with_refresh(
        self: &Arc<Self>,
        query: &str,
        params: &serde_json::Value,
        compute: ComputeFn,
        options: QuerySetOptions,
    ) -> Result<serde_json::Value, DomainError> {
        let key = self.keys.query_key(query, params)?;

        if let Some(record) = self.lookup(&key).await? {
            let value = self.decode_value(&record)?;

            let stale = record
                .remaining_fraction(Utc::now())
                .is_some_and(|fraction| fraction < self.config.refresh_threshold);

            if stale && self.state.lock().await.refreshing.insert(key.clone()) {
                self.spawn_refresh(key, query.to_string(), params.clone(), compute, options);
            }

            return Ok(value);
        }

        let started = Instant::now();
        let value = (compute)().await?;
        self.set(
            query,
            params,
            &value,
            QuerySetOptions {
                execution_time: Some(started.elapsed()),
                ..options
            },
        )
        .await?;

        Ok(value)
    }

    /// Stores `result`, or points this query at an equivalent cached result
    /// according to the dedup strategy
    pub async fn set(
        &self,
        query: &str,
        params: &serde_json::Value,
        result: &serde_json::Value,
        options: QuerySetOptions,
    ) -> Result<SetOutcome, DomainError> {
        let key = self.keys.query_key(query, params)?;
        let fingerprint = self.keys.fingerprint(query, params, result)?;
        let ttl = if options.no_expiry {
            None
        } else {
            options.ttl.or_else(|| self.config.default_ttl())
        };

        let mut record = QueryResult::new(
            key.clone(),
            query,
            result,
            fingerprint,
            ttl,
            self.config.compression_threshold(),
        )?
        .with_tags(options.tags);

        if let Some(execution_time) = options.execution_time {
            record = record.with_execution_time(execution_time);
        }

        let payload = match self.remote {
            Some(_) => Some(self.serializer.encode(&StoredQuery::Result(record.clone()))?),
            None => None,
        };

        let now = Utc::now();
        let (outcome, evicted, entries, write_record, stale_aliases) = {
            let mut state = self.state.lock().await;

            match self.find_duplicate(&state, &record, now) {
                Some(Duplicate::SameKey) => {
                    if let Some(existing) = state.entries.get(&key) {
                        record.carry_usage_from(existing);
                    }
                    self.insert(&mut state, record, now);
                    state.counters.deduplicated += 1;
                    let entries = state.entries.len();
                    (SetOutcome::Deduplicated { key: key.clone() }, 0, entries, true, Vec::new())
                }
                Some(Duplicate::Other(canonical)) => {
                    let stale = state.remove_entry(&key);
                    state.aliases.insert(key.clone(), canonical.clone());
                    state.counters.deduplicated += 1;
                    let entries = state.entries.len();
                    (SetOutcome::Deduplicated { key: canonical }, 0, entries, false, stale)
                }
                None => {
                    state.aliases.remove(&key);
                    // Aliases of the replaced content no longer share this result
                    let stale = state.remove_entry(&key);
                    let evicted = self.insert(&mut state, record, now);
                    state.counters.insertions += 1;
                    let entries = state.entries.len();
                    (SetOutcome::Inserted { key: key.clone() }, evicted, entries, true, stale)
                }
            }
        };

        if outcome.is_deduplicated() {
            self.emit(CacheEventKind::Deduplication, None);
            debug!(cache = %self.name, key = %key, canonical = %outcome.key(), "Deduplicated query result");
        }
        for _ in 0..evicted {
            self.emit(CacheEventKind::Eviction, None);
        }
        self.report_size(entries);

        if let Some(remote) = &self.remote {
            if !stale_aliases.is_empty() {
                remote.absorb("delete", remote.store().delete(&stale_aliases).await);
            }

            let bytes = if write_record {
                payload
            } else {
                Some(self.serializer.encode(&StoredQuery::Alias {
                    canonical_key: outcome.key().to_string(),
                })?)
            };

            if let Some(bytes) = bytes {
                remote.absorb(
                    "set",
                    remote
                        .store()
                        .set(&key, &bytes, SetOptions::new().with_ttl(ttl))
                        .await,
                );
            }
        }

        Ok(outcome)
    }

    /// Removes the result for this query and parameters from both tiers
    pub async fn invalidate(
        &self,
        query: &str,
        params: &serde_json::Value,
    ) -> Result<bool, DomainError> {
        let key = self.keys.query_key(query, params)?;

        let (mut removed_keys, entries) = {
            let mut state = self.state.lock().await;
            let mut removed = Vec::new();

            if state.aliases.remove(&key).is_some() {
                removed.push(key.clone());
            } else if state.entries.contains_key(&key) {
                removed.extend(state.remove_entry(&key));
                removed.push(key.clone());
            }

            (removed, state.entries.len())
        };
        self.report_size(entries);

        let mut removed = !removed_keys.is_empty();

        if let Some(remote) = &self.remote {
            if removed_keys.is_empty() {
                removed_keys.push(key);
            }

            let deleted = remote
                .absorb("delete", remote.store().delete(&removed_keys).await)
                .unwrap_or(0);
            removed |= deleted > 0;
        }

        Ok(removed)
    }

    /// Removes every result carrying `tag`, and the aliases pointing at them,
    /// from both tiers; returns the number of keys removed
    pub async fn invalidate_by_tag(&self, tag: &str) -> Result<usize, DomainError> {
        let mut removed: HashSet<String> = HashSet::new();

        let entries = {
            let mut state = self.state.lock().await;
            let tagged: Vec<String> = state
                .entries
                .iter()
                .filter(|(_, record)| record.has_tag(tag))
                .map(|(key, _)| key.clone())
                .collect();

            for key in tagged {
                removed.extend(state.remove_entry(&key));
                removed.insert(key);
            }

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
        {
            let mut state = self.state.lock().await;
            state.entries.clear();
            state.aliases.clear();
        }
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

    /// Drops expired results from memory; returns how many were removed
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();

        let (purged, entries) = {
            let mut state = self.state.lock().await;
            let expired: Vec<String> = state
                .entries
                .iter()
                .filter(|(_, record)| record.is_expired_at(now))
                .map(|(key, _)| key.clone())
                .collect();

            for key in &expired {
                state.remove_entry(key);
            }
            state.counters.expirations += expired.len() as u64;

            (expired.len(), state.entries.len())
        };

        for _ in 0..purged {
            self.emit(CacheEventKind::Expiration, None);
        }
        if purged > 0 {
            self.report_size(entries);
        }

        purged
    }

    pub async fn stats(&self) -> QueryCacheStats {
        let warming = self.warming_stats().await;
        let state = self.state.lock().await;
        let counters = &state.counters;

        QueryCacheStats {
            entries: state.entries.len(),
            aliases: state.aliases.len(),
            max_entries: self.config.max_entries,
            hits: counters.hits,
            misses: counters.misses,
            insertions: counters.insertions,
            deduplicated: counters.deduplicated,
            evictions: counters.evictions,
            expirations: counters.expirations,
            errors: self.errors.load(Ordering::Relaxed),
            compressed_entries: state
                .entries
                .values()
                .filter(|record| record.is_compressed())
                .count(),
            stored_bytes: state.entries.values().map(QueryResult::stored_bytes).sum(),
            refreshes: counters.refreshes,
            remote_available: self.remote.as_ref().is_some_and(RemoteTier::is_available),
            warming,
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

    /// Registers a warming task; returns its id
    pub async fn register_warming_task(&self, task: WarmingTask) -> String {
        let id = task.id.clone();

        info!(cache = %self.name, task_id = %id, query = %task.query, priority = task.priority, "Registered warming task");

        self.tasks.lock().await.push(task);
        id
    }

    pub async fn unregister_warming_task(&self, id: &str) -> bool {
        let mut tasks = self.tasks.lock().await;
        let before = tasks.len();
        tasks.retain(|task| task.id != id);
        tasks.len() != before
    }

    /// Snapshot of the registered tasks, highest priority first
    pub async fn warming_tasks(&self) -> Vec<WarmingTask> {
        let mut tasks = self.tasks.lock().await.clone();
        tasks.sort_by(by_priority);
        tasks
    }

    pub async fn warming_stats(&self) -> WarmingStats {
        let registered_tasks = self.tasks.lock().await.len();
        let stats = self
            .warming
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default();

        WarmingStats {
            registered_tasks,
            ..stats
        }
    }

    /// Runs every registered task once, highest priority first
    pub async fn warm_now(&self) -> WarmingRunSummary {
        let tasks = self.warming_tasks().await;
        self.run_tasks(tasks).await
    }

    /// Runs the tasks whose interval has elapsed
    pub async fn run_due_tasks(&self) -> WarmingRunSummary {
        let now = Utc::now();
        let interval = self.config.warming_interval();

        let due: Vec<WarmingTask> = self
            .warming_tasks()
            .await
            .into_iter()
            .filter(|task| task.is_due(now, interval))
            .collect();

        self.run_tasks(due).await
    }

    /// Runs the single most urgent due task, if any
    pub async fn run_next_due_task(&self) -> WarmingRunSummary {
        let now = Utc::now();
        let interval = self.config.warming_interval();

        let next = self
            .warming_tasks()
            .await
            .into_iter()
            .find(|task| task.is_due(now, interval));

        self.run_tasks(next.into_iter().collect()).await
    }

    /// Re-runs tasks whose cached entry has reached
    /// `preemptive_min_access_count` hits
    pub async fn run_hot_tasks(&self) -> WarmingRunSummary {
        let tasks = self.warming_tasks().await;
        let mut hot = Vec::new();

        {
            let state = self.state.lock().await;

            for task in tasks {
                let Ok(key) = self.keys.query_key(&task.query, &task.params) else {
                    continue;
                };

                let accesses = state
                    .entries
                    .get(&state.canonical_key(&key))
                    .map_or(0, |record| record.access_count());

                if accesses >= self.config.preemptive_min_access_count {
                    hot.push(task);
                }
            }
        }

        self.run_tasks(hot).await
    }

    async fn run_tasks(&self, tasks: Vec<WarmingTask>) -> WarmingRunSummary {
        let mut summary = WarmingRunSummary::default();

        for task in tasks {
            summary.attempted += 1;
            let result = self.run_task(&task).await;
            let now = Utc::now();

            match &result {
                Ok(()) => summary.succeeded += 1,
                Err(e) => {
                    summary.failed += 1;
                    warn!(cache = %self.name, task_id = %task.id, query = %task.query, error = %e, "Warming task failed");
                }
            }

            let mut registered = self.tasks.lock().await;
            if let Some(stored) = registered.iter_mut().find(|t| t.id == task.id) {
                stored.last_run = Some(now);
                stored.run_count += 1;
                match result {
                    Ok(()) => stored.last_error = None,
                    Err(e) => {
                        stored.failure_count += 1;
                        stored.last_error = Some(e.to_string());
                    }
                }
            }
        }

        if summary.attempted > 0 {
            if let Ok(mut stats) = self.warming.lock() {
                stats.runs += summary.attempted as u64;
                stats.succeeded += summary.succeeded as u64;
                stats.failed += summary.failed as u64;
            }

            debug!(
                cache = %self.name,
                attempted = summary.attempted,
                succeeded = summary.succeeded,
                failed = summary.failed,
                "Warming pass finished"
            );
        }

        summary
    }

    async fn run_task(&self, task: &WarmingTask) -> Result<(), DomainError> {
        let started = Instant::now();
        let value = (task.compute)().await?;

        let mut options = QuerySetOptions::new().with_execution_time(started.elapsed());
        options.ttl = task.ttl;
        options.tags = task.tags.clone();

        self.set(&task.query, &task.params, &value, options).await?;
        Ok(())
    }

    fn spawn_refresh(
        self: &Arc<Self>,
        key: String,
        query: String,
        params: serde_json::Value,
        compute: ComputeFn,
        options: QuerySetOptions,
    ) {
        let this = Arc::clone(self);

        debug!(cache = %self.name, key = %key, "Refreshing entry ahead of expiry");

        tokio::spawn(async move {
            let started = Instant::now();
            let result = match (compute)().await {
                Ok(value) => this
                    .set(
                        &query,
                        &params,
                        &value,
                        QuerySetOptions {
                            execution_time: Some(started.elapsed()),
                            ..options
                        },
                    )
                    .await
                    .map(|_| ()),
                Err(e) => Err(e),
            };

            let mut state = this.state.lock().await;
            state.refreshing.remove(&key);

            match result {
                Ok(()) => state.counters.refreshes += 1,
                Err(e) => {
                    drop(state);
                    this.record_error();
                    warn!(cache = %this.name, key = %key, error = %e, "Background refresh failed");
                }
            }
        });
    }

    /// Memory first, then the remote tier (following alias records);
    /// remote hits are promoted into memory
    async fn lookup(&self, key: &str) -> Result<Option<QueryResult>, DomainError> {
        let started = Instant::now();

        {
            let mut state = self.state.lock().await;
            let now = Utc::now();
            let canonical = state.canonical_key(key);
            let expired = state
                .entries
                .get(&canonical)
                .map(|record| record.is_expired_at(now));

            match expired {
                Some(true) => {
                    state.remove_entry(&canonical);
                    state.counters.expirations += 1;
                    let entries = state.entries.len();
                    drop(state);

                    self.emit(CacheEventKind::Expiration, None);
                    self.report_size(entries);
                }
                Some(false) => {
                    let seq = state.next_seq();
                    state.counters.hits += 1;

                    let record = state
                        .entries
                        .get_mut(&canonical)
                        .ok_or_else(|| DomainError::internal("Entry vanished under lock"))?;
                    record.touch(seq, now);
                    let snapshot = record.clone();
                    drop(state);

                    self.emit(CacheEventKind::Hit, Some(started));
                    debug!(cache = %self.name, key, "Query cache hit");

                    return Ok(Some(snapshot));
                }
                None => {}
            }
        }

        if let Some(remote) = &self.remote {
            if let Some(record) = self.fetch_remote(remote, key).await? {
                let now = Utc::now();
                let canonical = record.key().to_string();

                let (snapshot, evicted, entries) = {
                    let mut state = self.state.lock().await;

                    if canonical != key {
                        state.aliases.insert(key.to_string(), canonical.clone());
                    }

                    let evicted = if state.entries.contains_key(&canonical) {
                        0
                    } else {
                        self.insert(&mut state, record, now)
                    };

                    let seq = state.next_seq();
                    state.counters.hits += 1;

                    let record = state
                        .entries
                        .get_mut(&canonical)
                        .ok_or_else(|| DomainError::internal("Entry vanished under lock"))?;
                    record.touch(seq, now);
                    let snapshot = record.clone();

                    (snapshot, evicted, state.entries.len())
                };

                for _ in 0..evicted {
                    self.emit(CacheEventKind::Eviction, None);
                }
                self.report_size(entries);
                self.emit(CacheEventKind::Hit, Some(started));

                debug!(cache = %self.name, key, "Promoted query result from remote tier");

                return Ok(Some(snapshot));
            }
        }

        self.state.lock().await.counters.misses += 1;
        self.emit(CacheEventKind::Miss, Some(started));

        debug!(cache = %self.name, key, "Query cache miss");

        Ok(None)
    }

    async fn fetch_remote(
        &self,
        remote: &RemoteTier,
        key: &str,
    ) -> Result<Option<QueryResult>, DomainError> {
        let Some(Some(bytes)) = remote.absorb("get", remote.store().get(key).await) else {
            return Ok(None);
        };

        let record = match self.decode_record(&bytes)? {
            StoredQuery::Result(record) => record,
            StoredQuery::Alias { canonical_key } => {
                let Some(Some(bytes)) =
                    remote.absorb("get", remote.store().get(&canonical_key).await)
                else {
                    return Ok(None);
                };

                match self.decode_record(&bytes)? {
                    StoredQuery::Result(record) => record,
                    StoredQuery::Alias { .. } => return Ok(None),
                }
            }
        };

        if record.is_expired_at(Utc::now()) {
            return Ok(None);
        }

        Ok(Some(record))
    }

    async fn invalidate_remote_tag(&self, remote: &RemoteTier, tag: &str) -> Vec<String> {
        let Some(keys) = remote.absorb(
            "scan",
            scan_all(remote.store(), &self.keys.prefix_pattern(), None).await,
        ) else {
            return Vec::new();
        };

        let mut tagged = HashSet::new();
        let mut aliases: Vec<(String, String)> = Vec::new();

        for chunk in keys.chunks(DEFAULT_SCAN_COUNT) {
            let Some(records) = remote.absorb("multi_get", remote.store().multi_get(chunk).await)
            else {
                return Vec::new();
            };

            for (key, bytes) in records {
                match self.serializer.decode::<StoredQuery>(&bytes) {
                    Ok(StoredQuery::Result(record)) if record.has_tag(tag) => {
                        tagged.insert(key);
                    }
                    Ok(StoredQuery::Result(_)) => {}
                    Ok(StoredQuery::Alias { canonical_key }) => aliases.push((key, canonical_key)),
                    Err(e) => {
                        warn!(cache = %self.name, key = %key, error = %e, "Skipping undecodable record");
                    }
                }
            }
        }

        let mut doomed: Vec<String> = aliases
            .into_iter()
            .filter(|(_, canonical)| tagged.contains(canonical))
            .map(|(alias, _)| alias)
            .collect();
        doomed.extend(tagged);

        let mut removed = Vec::new();

        for chunk in doomed.chunks(DEFAULT_SCAN_COUNT) {
            if remote
                .absorb("delete", remote.store().delete(chunk).await)
                .is_none()
            {
                break;
            }
            removed.extend_from_slice(chunk);
        }

        removed
    }

    fn find_duplicate(
        &self,
        state: &QueryState,
        record: &QueryResult,
        now: DateTime<Utc>,
    ) -> Option<Duplicate> {
        let strategy = self.config.dedup_strategy;

        if strategy == DedupStrategy::None {
            return None;
        }

        let fingerprint = record.fingerprint();

        if let Some(existing) = state.entries.get(record.key()) {
            if !existing.is_expired_at(now)
                && existing.fingerprint().content_hash == fingerprint.content_hash
            {
                return Some(Duplicate::SameKey);
            }
        }

        let equivalent = |existing: &QueryResult| match strategy {
            DedupStrategy::ContentHash => {
                existing.fingerprint().content_hash == fingerprint.content_hash
            }
            DedupStrategy::Parameterized => {
                existing.fingerprint().query_hash == fingerprint.query_hash
            }
            DedupStrategy::None | DedupStrategy::ExactMatch => false,
        };

        state
            .entries
            .iter()
            .filter(|(key, existing)| {
                key.as_str() != record.key() && !existing.is_expired_at(now) && equivalent(*existing)
            })
            .min_by_key(|(_, existing)| existing.insert_seq())
            .map(|(key, _)| Duplicate::Other(key.clone()))
    }

    /// Makes room and inserts; returns the number of entries evicted
    fn insert(&self, state: &mut QueryState, mut record: QueryResult, now: DateTime<Utc>) -> usize {
        let key = record.key().to_string();
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

            for (victim, _) in &outcome.evicted {
                debug!(cache = %self.name, key = %victim, policy = %self.config.eviction_policy, "Evicted query result");
            }

            if !outcome.evicted.is_empty() {
                let entries = &state.entries;
                state.aliases.retain(|_, canonical| entries.contains_key(canonical));
            }

            evicted = outcome.evicted.len();
            state.counters.evictions += evicted as u64;
        }

        let seq = state.next_seq();
        record.stamp(seq);
        state.entries.insert(key, record);

        evicted
    }

    fn decode_record(&self, bytes: &[u8]) -> Result<StoredQuery, DomainError> {
        self.serializer.decode(bytes).inspect_err(|_| self.record_error())
    }

    fn decode_value(&self, record: &QueryResult) -> Result<serde_json::Value, DomainError> {
        record.value().inspect_err(|_| self.record_error())
    }

    fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.emit(CacheEventKind::Error, None);
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
