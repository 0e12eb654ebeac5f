//! Persistent store implementations

mod cluster;
mod factory;
mod in_memory;
mod redis;
mod retry;

pub use cluster::{
    ClusterDistribution, ClusterStore, ConsistentHashRing, NodeDistribution, DEFAULT_VIRTUAL_NODES,
};
pub use factory::{StoreBackend, StoreFactory, StoreSettings};
pub use in_memory::{glob_to_regex, InMemoryStore};
pub use redis::{RedisStore, RedisStoreConfig};
pub use retry::{with_retry, RetryConfig};
