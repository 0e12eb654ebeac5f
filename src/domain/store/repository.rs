//! Persistent store trait definition

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::domain::health::HealthReport;
use crate::domain::DomainError;

#[cfg(test)]
use mockall::automock;

/// Number of keys requested per SCAN round-trip unless overridden
pub const DEFAULT_SCAN_COUNT: usize = 100;

/// Write conditions for a single SET
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Expire the key after this long (whole seconds, minimum 1)
    pub ttl: Option<Duration>,
    /// Only write when the key does not exist (NX)
    pub only_if_absent: bool,
    /// Only write when the key already exists (XX)
    pub only_if_present: bool,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn only_if_absent(mut self) -> Self {
        self.only_if_absent = true;
        self
    }

    pub fn only_if_present(mut self) -> Self {
        self.only_if_present = true;
        self
    }
}

/// Remaining lifetime of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key does not exist
    Missing,
    /// Key exists without an expiry
    Persistent,
    /// Key expires after the given duration
    Expires(Duration),
}

impl KeyTtl {
    /// Redis-style seconds: -2 missing, -1 no expiry
    pub fn as_seconds(&self) -> i64 {
        match self {
            Self::Missing => -2,
            Self::Persistent => -1,
            Self::Expires(ttl) => ttl.as_secs() as i64,
        }
    }

    pub fn from_seconds(seconds: i64) -> Self {
        match seconds {
            -2 => Self::Missing,
            s if s < 0 => Self::Persistent,
            s => Self::Expires(Duration::from_secs(s as u64)),
        }
    }

    pub fn remaining(&self) -> Option<Duration> {
        match self {
            Self::Expires(ttl) => Some(*ttl),
            _ => None,
        }
    }
}

/// A single command inside a pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCommand {
    Get { key: String },
    Set { key: String, value: Vec<u8>, options: SetOptions },
    Delete { keys: Vec<String> },
    Incr { key: String, by: i64 },
    Expire { key: String, ttl: Duration },
}

/// Reply for the command at the same position in a pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum StoreReply {
    Value(Option<Vec<u8>>),
    Written(bool),
    Count(u64),
    Integer(i64),
}

/// Receives messages published on a subscribed channel
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, channel: &str, payload: &[u8]);
}

/// Live subscription; dropping it also stops the listener
#[derive(Debug)]
pub struct SubscriptionHandle {
    channel: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn new(channel: impl Into<String>, shutdown: watch::Sender<bool>, task: JoinHandle<()>) -> Self {
        Self {
            channel: channel.into(),
            shutdown,
            task,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Signals the listener and waits for the message currently being handled to finish
    pub async fn unsubscribe(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

/// Pooled client to a remote key-value service
///
/// Implementations must raise `DomainError::Connection` when the service
/// is unreachable and `DomainError::Store` on protocol failures.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PersistentStore: Send + Sync + Debug {
    /// Gets the raw bytes stored under a key
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DomainError>;

    /// Writes a value; returns false when an NX/XX condition prevented the write
    async fn set(&self, key: &str, value: &[u8], options: SetOptions) -> Result<bool, DomainError>;

    /// Deletes keys, returning how many existed
    async fn delete(&self, keys: &[String]) -> Result<u64, DomainError>;

    async fn exists(&self, key: &str) -> Result<bool, DomainError>;

    async fn ttl(&self, key: &str) -> Result<KeyTtl, DomainError>;

    /// Updates the expiry of an existing key
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, DomainError>;

    /// Batch get; missing keys are absent from the map
    async fn multi_get(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>, DomainError>;

    /// Batch set executed as one pipeline
    async fn multi_set(
        &self,
        entries: &[(String, Vec<u8>)],
        ttl: Option<Duration>,
    ) -> Result<bool, DomainError>;

    async fn incr(&self, key: &str, by: i64) -> Result<i64, DomainError>;

    async fn decr(&self, key: &str, by: i64) -> Result<i64, DomainError> {
        self.incr(key, -by).await
    }

    /// One non-blocking cursor step; a returned cursor of 0 ends the iteration
    async fn scan(
        &self,
        pattern: &str,
        cursor: u64,
        count: usize,
    ) -> Result<(u64, Vec<String>), DomainError>;

    /// Deletes every key matching a glob pattern with repeated scan + delete
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, DomainError> {
        let mut cursor = 0u64;
        let mut total_deleted = 0u64;

        loop {
            let (next_cursor, keys) = self.scan(pattern, cursor, DEFAULT_SCAN_COUNT).await?;

            if !keys.is_empty() {
                total_deleted += self.delete(&keys).await?;
            }

            cursor = next_cursor;

            if cursor == 0 {
                break;
            }
        }

        Ok(total_deleted)
    }

    /// Executes commands in one round-trip; `atomic` wraps them in a transaction
    async fn pipeline(
        &self,
        commands: Vec<StoreCommand>,
        atomic: bool,
    ) -> Result<Vec<StoreReply>, DomainError>;

    /// Publishes a message, returning the number of receivers
    async fn publish(&self, channel: &str, message: &[u8]) -> Result<u64, DomainError>;

    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionHandle, DomainError>;

    async fn health_check(&self) -> HealthReport;
}

/// Scans every key matching `pattern`, following the cursor until it wraps
pub async fn scan_all(
    store: &dyn PersistentStore,
    pattern: &str,
    limit: Option<usize>,
) -> Result<Vec<String>, DomainError> {
    let mut cursor = 0u64;
    let mut keys = Vec::new();

    loop {
        let (next_cursor, batch) = store.scan(pattern, cursor, DEFAULT_SCAN_COUNT).await?;
        keys.extend(batch);

        if let Some(limit) = limit {
            if keys.len() >= limit {
                keys.truncate(limit);
                break;
            }
        }

        cursor = next_cursor;

        if cursor == 0 {
            break;
        }
    }

    Ok(keys)
}
