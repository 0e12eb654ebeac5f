//! Store factory for runtime backend selection

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use super::cluster::{ClusterStore, DEFAULT_VIRTUAL_NODES};
use super::in_memory::InMemoryStore;
use super::redis::{RedisStore, RedisStoreConfig};
use super::retry::RetryConfig;
use crate::domain::store::{PersistentStore, SerializationFormat};
use crate::domain::DomainError;

/// Supported store backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
    Cluster,
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::Memory => write!(f, "memory"),
            StoreBackend::Redis => write!(f, "redis"),
            StoreBackend::Cluster => write!(f, "cluster"),
        }
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "in_memory" | "inmemory" => Ok(StoreBackend::Memory),
            "redis" => Ok(StoreBackend::Redis),
            "cluster" | "redis_cluster" => Ok(StoreBackend::Cluster),
            _ => Err(DomainError::backend_not_available("store backend", s)),
        }
    }
}

/// `[store]` configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    /// `memory`, `redis` or `cluster`
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_url")]
    pub url: String,
    /// Node URLs for the `cluster` backend
    #[serde(default)]
    pub cluster_nodes: Vec<String>,
    #[serde(default = "default_virtual_nodes")]
    pub virtual_nodes: usize,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
    /// Encoding of cache records written to the store
    #[serde(default)]
    pub serialization: SerializationFormat,
}

fn default_backend() -> String {
    StoreBackend::Memory.to_string()
}

fn default_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_virtual_nodes() -> usize {
    DEFAULT_VIRTUAL_NODES
}

fn default_pool_size() -> usize {
    4
}

fn default_max_in_flight() -> usize {
    256
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_initial_delay_ms() -> u64 {
    100
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: default_url(),
            cluster_nodes: Vec::new(),
            virtual_nodes: default_virtual_nodes(),
            pool_size: default_pool_size(),
            max_in_flight: default_max_in_flight(),
            connect_timeout_secs: default_connect_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            serialization: SerializationFormat::default(),
        }
    }
}

impl StoreSettings {
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn redis(url: impl Into<String>) -> Self {
        Self {
            backend: StoreBackend::Redis.to_string(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn cluster(nodes: Vec<String>) -> Self {
        Self {
            backend: StoreBackend::Cluster.to_string(),
            cluster_nodes: nodes,
            ..Default::default()
        }
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_serialization(mut self, format: SerializationFormat) -> Self {
        self.serialization = format;
        self
    }

    pub fn backend(&self) -> Result<StoreBackend, DomainError> {
        self.backend.parse()
    }

    fn redis_config(&self, url: &str) -> RedisStoreConfig {
        RedisStoreConfig::new(url)
            .with_pool_size(self.pool_size)
            .with_max_in_flight(self.max_in_flight)
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs.max(1)))
            .with_retry(
                RetryConfig::new()
                    .max_attempts(self.retry_attempts)
                    .initial_delay(Duration::from_millis(self.retry_initial_delay_ms)),
            )
    }
}

/// Factory for creating store instances
#[derive(Debug, Default)]
pub struct StoreFactory;

impl StoreFactory {
    /// Builds and connects the configured backend
    pub async fn create(settings: &StoreSettings) -> Result<Arc<dyn PersistentStore>, DomainError> {
        let backend = settings.backend()?;

        let store: Arc<dyn PersistentStore> = match backend {
            StoreBackend::Memory => Arc::new(InMemoryStore::new()),
            StoreBackend::Redis => {
                Arc::new(RedisStore::connect_with(settings.redis_config(&settings.url)).await?)
            }
            StoreBackend::Cluster => {
                if settings.cluster_nodes.is_empty() {
                    return Err(DomainError::configuration(
                        "The cluster backend requires at least one entry in cluster_nodes",
                    ));
                }

                let mut nodes = Vec::with_capacity(settings.cluster_nodes.len());
                for url in &settings.cluster_nodes {
                    let store = RedisStore::connect_with(settings.redis_config(url)).await?;
                    nodes.push((node_id(url), Arc::new(store) as Arc<dyn PersistentStore>));
                }

                Arc::new(ClusterStore::new(nodes, settings.virtual_nodes)?)
            }
        };

        info!(backend = %backend, "Persistent store ready");

        Ok(store)
    }
}

/// `host:port/db` part of a node URL, used as its ring identity
fn node_id(url: &str) -> String {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let without_credentials = without_scheme
        .rsplit_once('@')
        .map_or(without_scheme, |(_, rest)| rest);

    without_credentials.to_string()
}
