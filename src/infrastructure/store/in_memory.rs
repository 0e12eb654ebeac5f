//! Process-local `PersistentStore` for development and tests

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, warn};

use crate::domain::store::{
    KeyTtl, MessageHandler, PersistentStore, SetOptions, StoreCommand, StoreReply,
    SubscriptionHandle,
};
use crate::domain::{DomainError, HealthReport};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct StoredValue {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Debug, Default)]
struct Keyspace {
    values: HashMap<String, StoredValue>,
}

impl Keyspace {
    /// Live value for `key`, dropping it first when expired
    fn live(&mut self, key: &str, now: Instant) -> Option<&mut StoredValue> {
        if self.values.get(key).is_some_and(|v| v.is_expired(now)) {
            self.values.remove(key);
        }

        self.values.get_mut(key)
    }

    fn get(&mut self, key: &str, now: Instant) -> Option<Vec<u8>> {
        self.live(key, now).map(|v| v.data.clone())
    }

    fn set(&mut self, key: &str, value: &[u8], options: &SetOptions, now: Instant) -> bool {
        let exists = self.live(key, now).is_some();

        if (options.only_if_absent && exists) || (options.only_if_present && !exists) {
            return false;
        }

        self.values.insert(
            key.to_string(),
            StoredValue {
                data: value.to_vec(),
                expires_at: options.ttl.and_then(|ttl| now.checked_add(ttl)),
            },
        );

        true
    }

    fn delete(&mut self, keys: &[String], now: Instant) -> u64 {
        keys.iter()
            .filter(|key| {
                let existed = self.live(key, now).is_some();
                self.values.remove(key.as_str());
                existed
            })
            .count() as u64
    }

    fn ttl(&mut self, key: &str, now: Instant) -> KeyTtl {
        match self.live(key, now) {
            None => KeyTtl::Missing,
            Some(StoredValue {
                expires_at: None, ..
            }) => KeyTtl::Persistent,
            Some(StoredValue {
                expires_at: Some(at),
                ..
            }) => KeyTtl::Expires(at.saturating_duration_since(now)),
        }
    }

    fn expire(&mut self, key: &str, ttl: Duration, now: Instant) -> bool {
        match self.live(key, now) {
            Some(value) => {
                value.expires_at = now.checked_add(ttl);
                true
            }
            None => false,
        }
    }

    fn incr(&mut self, key: &str, by: i64, now: Instant) -> Result<i64, DomainError> {
        let current = match self.live(key, now) {
            Some(value) => std::str::from_utf8(&value.data)
                .ok()
                .and_then(|text| text.parse::<i64>().ok())
                .ok_or_else(|| {
                    DomainError::store(format!("Value at '{}' is not an integer", key))
                })?,
            None => 0,
        };

        let next = current
            .checked_add(by)
            .ok_or_else(|| DomainError::store(format!("Increment of '{}' overflows", key)))?;

        let expires_at = self.live(key, now).and_then(|v| v.expires_at);
        self.values.insert(
            key.to_string(),
            StoredValue {
                data: next.to_string().into_bytes(),
                expires_at,
            },
        );

        Ok(next)
    }

    fn apply(&mut self, command: &StoreCommand, now: Instant) -> Result<StoreReply, DomainError> {
        let reply = match command {
            StoreCommand::Get { key } => StoreReply::Value(self.get(key, now)),
            StoreCommand::Set {
                key,
                value,
                options,
            } => StoreReply::Written(self.set(key, value, options, now)),
            StoreCommand::Delete { keys } => StoreReply::Count(self.delete(keys, now)),
            StoreCommand::Incr { key, by } => StoreReply::Integer(self.incr(key, *by, now)?),
            StoreCommand::Expire { key, ttl } => StoreReply::Written(self.expire(key, *ttl, now)),
        };

        Ok(reply)
    }
}

/// In-process key-value store with TTL, glob scan and pub/sub
///
/// Sub-second TTLs are kept as given rather than rounded to whole seconds.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    keyspace: Mutex<Keyspace>,
    channels: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let keyspace = self.keyspace.lock().await;
        keyspace.values.values().filter(|v| !v.is_expired(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl PersistentStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DomainError> {
        Ok(self.keyspace.lock().await.get(key, Instant::now()))
    }

    async fn set(&self, key: &str, value: &[u8], options: SetOptions) -> Result<bool, DomainError> {
        Ok(self
            .keyspace
            .lock()
            .await
            .set(key, value, &options, Instant::now()))
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, DomainError> {
        Ok(self.keyspace.lock().await.delete(keys, Instant::now()))
    }

    async fn exists(&self, key: &str) -> Result<bool, DomainError> {
        Ok(self
            .keyspace
            .lock()
            .await
            .live(key, Instant::now())
            .is_some())
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, DomainError> {
        Ok(self.keyspace.lock().await.ttl(key, Instant::now()))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, DomainError> {
        Ok(self.keyspace.lock().await.expire(key, ttl, Instant::now()))
    }

    async fn multi_get(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>, DomainError> {
        let now = Instant::now();
        let mut keyspace = self.keyspace.lock().await;

        Ok(keys
            .iter()
            .filter_map(|key| keyspace.get(key, now).map(|v| (key.clone(), v)))
            .collect())
    }

    async fn multi_set(
        &self,
        entries: &[(String, Vec<u8>)],
        ttl: Option<Duration>,
    ) -> Result<bool, DomainError> {
        let now = Instant::now();
        let options = SetOptions::new().with_ttl(ttl);
        let mut keyspace = self.keyspace.lock().await;

        for (key, value) in entries {
            keyspace.set(key, value, &options, now);
        }

        Ok(true)
    }

    async fn incr(&self, key: &str, by: i64) -> Result<i64, DomainError> {
        self.keyspace.lock().await.incr(key, by, Instant::now())
    }

    async fn scan(
        &self,
        pattern: &str,
        cursor: u64,
        count: usize,
    ) -> Result<(u64, Vec<String>), DomainError> {
        let matcher = glob_to_regex(pattern)?;
        let now = Instant::now();
        let keyspace = self.keyspace.lock().await;

        let mut remaining: Vec<(u64, &String)> = keyspace
            .values
            .iter()
            .filter(|(_, v)| !v.is_expired(now))
            .map(|(k, _)| (scan_position(k), k))
            .filter(|(position, _)| *position >= cursor)
            .collect();
        remaining.sort();

        // Keys sharing a position stay in one batch so resuming never skips them
        let mut end = count.max(1).min(remaining.len());
        while end < remaining.len() && remaining[end].0 == remaining[end - 1].0 {
            end += 1;
        }

        let keys = remaining[..end]
            .iter()
            .filter(|(_, key)| matcher.is_match(key))
            .map(|(_, key)| (*key).clone())
            .collect();

        let next_cursor = if end >= remaining.len() {
            0
        } else {
            remaining[end - 1].0 + 1
        };

        Ok((next_cursor, keys))
    }

    async fn pipeline(
        &self,
        commands: Vec<StoreCommand>,
        _atomic: bool,
    ) -> Result<Vec<StoreReply>, DomainError> {
        // The keyspace lock is held for the whole batch, so every pipeline is atomic here
        let now = Instant::now();
        let mut keyspace = self.keyspace.lock().await;

        commands
            .iter()
            .map(|command| keyspace.apply(command, now))
            .collect()
    }

    async fn publish(&self, channel: &str, message: &[u8]) -> Result<u64, DomainError> {
        let channels = self.channels.lock().await;

        Ok(channels
            .get(channel)
            .and_then(|sender| sender.send(message.to_vec()).ok())
            .unwrap_or(0) as u64)
    }

    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionHandle, DomainError> {
        let mut receiver = self
            .channels
            .lock()
            .await
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let channel_name = channel.to_string();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    message = receiver.recv() => match message {
                        Ok(payload) => handler.handle(&channel_name, &payload).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(channel = %channel_name, skipped, "Subscriber lagged behind");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }

            debug!(channel = %channel_name, "Subscription stopped");
        });

        Ok(SubscriptionHandle::new(channel, shutdown_tx, task))
    }

    async fn health_check(&self) -> HealthReport {
        HealthReport::healthy()
            .with_detail("backend", "memory")
            .with_detail("keys", self.len().await)
    }
}

/// Stable 48-bit scan order; keys keep their position while others come and go
fn scan_position(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish() >> 16
}

/// Translates a Redis glob (`*`, `?`, `[abc]`, `[^a-z]`, `\x`) into an anchored regex
pub fn glob_to_regex(pattern: &str) -> Result<Regex, DomainError> {
    let mut out = String::from("(?s)^");
    let mut chars = pattern.chars();

    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push_str(&regex::escape(&next.to_string()));
                }
            }
            '[' => {
                out.push('[');
                let mut first = true;
                let mut closed = false;

                while let Some(c) = chars.next() {
                    match c {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '^' | '!' if first => out.push('^'),
                        '-' => out.push('-'),
                        '\\' => {
                            if let Some(next) = chars.next() {
                                out.push_str(&regex::escape(&next.to_string()));
                            }
                        }
                        c => out.push_str(&regex::escape(&c.to_string())),
                    }
                    first = false;
                }

                if !closed {
                    return Err(DomainError::validation(format!(
                        "Unterminated character class in pattern '{}'",
                        pattern
                    )));
                }

                out.push(']');
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }

    out.push('$');

    Regex::new(&out)
        .map_err(|e| DomainError::validation(format!("Invalid pattern '{}': {}", pattern, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::store::scan_all;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Collect {
        received: std::sync::Mutex<Vec<(String, Vec<u8>)>>,
        count: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for Collect {
        async fn handle(&self, channel: &str, payload: &[u8]) {
            self.received
                .lock()
                .unwrap()
                .push((channel.to_string(), payload.to_vec()));
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_glob_patterns() {
        let re = glob_to_regex("semantic:bucket_04?:*").unwrap();
        assert!(re.is_match("semantic:bucket_042:abc"));
        assert!(!re.is_match("semantic:bucket_142:abc"));

        let re = glob_to_regex("h[ae]llo").unwrap();
        assert!(re.is_match("hello"));
        assert!(!re.is_match("hillo"));

        let re = glob_to_regex("h[^e]llo").unwrap();
        assert!(re.is_match("hallo"));
        assert!(!re.is_match("hello"));

        let re = glob_to_regex("k[a-c]").unwrap();
        assert!(re.is_match("kb"));
        assert!(!re.is_match("kd"));

        let re = glob_to_regex("a.b\\*").unwrap();
        assert!(re.is_match("a.b*"));
        assert!(!re.is_match("axb*"));

        assert!(glob_to_regex("broken[").is_err());
    }

    #[tokio::test]
    async fn test_set_get_with_conditions() {
        let store = InMemoryStore::new();

        assert!(store.set("k", b"1", SetOptions::new()).await.unwrap());
        assert!(!store
            .set("k", b"2", SetOptions::new().only_if_absent())
            .await
            .unwrap());
        assert!(!store
            .set("missing", b"2", SetOptions::new().only_if_present())
            .await
            .unwrap());
        assert!(store
            .set("k", b"3", SetOptions::new().only_if_present())
            .await
            .unwrap());

        assert_eq!(store.get("k").await.unwrap(), Some(b"3".to_vec()));
        assert!(!store.exists("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_and_expiry() {
        let store = InMemoryStore::new();

        store
            .set(
                "short",
                b"v",
                SetOptions::new().with_ttl(Some(Duration::from_millis(30))),
            )
            .await
            .unwrap();
        store.set("forever", b"v", SetOptions::new()).await.unwrap();

        assert!(matches!(store.ttl("short").await.unwrap(), KeyTtl::Expires(_)));
        assert_eq!(store.ttl("forever").await.unwrap(), KeyTtl::Persistent);
        assert_eq!(store.ttl("nothing").await.unwrap(), KeyTtl::Missing);

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(store.get("short").await.unwrap(), None);
        assert_eq!(store.ttl("short").await.unwrap(), KeyTtl::Missing);
        assert!(store.expire("forever", Duration::from_secs(60)).await.unwrap());
        assert!(!store.expire("short", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn test_incr_decr() {
        let store = InMemoryStore::new();

        assert_eq!(store.incr("counter", 5).await.unwrap(), 5);
        assert_eq!(store.decr("counter", 2).await.unwrap(), 3);

        store.set("text", b"abc", SetOptions::new()).await.unwrap();
        assert!(matches!(
            store.incr("text", 1).await,
            Err(DomainError::Store { .. })
        ));
    }

    #[tokio::test]
    async fn test_multi_get_set_and_delete() {
        let store = InMemoryStore::new();
        let entries = vec![
            ("a".to_string(), b"1".to_vec()),
            ("b".to_string(), b"2".to_vec()),
        ];

        assert!(store.multi_set(&entries, None).await.unwrap());

        let found = store
            .multi_get(&["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found["b"], b"2".to_vec());

        let deleted = store
            .delete(&["a".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
    }

    #[tokio::test]
    async fn test_scan_walks_cursor_and_delete_pattern() {
        let store = InMemoryStore::new();

        for i in 0..250 {
            store
                .set(&format!("q:{:03}", i), b"v", SetOptions::new())
                .await
                .unwrap();
        }
        store.set("other:1", b"v", SetOptions::new()).await.unwrap();

        let (cursor, first) = store.scan("q:*", 0, 100).await.unwrap();
        assert_ne!(cursor, 0);
        assert!(first.len() <= 100);

        let all = scan_all(&store, "q:*", None).await.unwrap();
        assert_eq!(all.len(), 250);

        assert_eq!(store.delete_pattern("q:*").await.unwrap(), 250);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_pipeline_replies_in_order() {
        let store = InMemoryStore::new();

        let replies = store
            .pipeline(
                vec![
                    StoreCommand::Set {
                        key: "a".to_string(),
                        value: b"1".to_vec(),
                        options: SetOptions::new(),
                    },
                    StoreCommand::Incr {
                        key: "n".to_string(),
                        by: 4,
                    },
                    StoreCommand::Get {
                        key: "a".to_string(),
                    },
                    StoreCommand::Expire {
                        key: "a".to_string(),
                        ttl: Duration::from_secs(10),
                    },
                    StoreCommand::Delete {
                        keys: vec!["a".to_string(), "n".to_string()],
                    },
                ],
                true,
            )
            .await
            .unwrap();

        assert_eq!(
            replies,
            vec![
                StoreReply::Written(true),
                StoreReply::Integer(4),
                StoreReply::Value(Some(b"1".to_vec())),
                StoreReply::Written(true),
                StoreReply::Count(2),
            ]
        );
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let store = InMemoryStore::new();
        let handler = Arc::new(Collect::default());

        assert_eq!(store.publish("events", b"nobody").await.unwrap(), 0);

        let subscription = store.subscribe("events", handler.clone()).await.unwrap();
        assert_eq!(subscription.channel(), "events");

        assert_eq!(store.publish("events", b"hello").await.unwrap(), 1);

        for _ in 0..50 {
            if handler.count.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        subscription.unsubscribe().await;

        let received = handler.received.lock().unwrap();
        assert_eq!(received.as_slice(), &[("events".to_string(), b"hello".to_vec())]);
    }
}
