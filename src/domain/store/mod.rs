//! Remote key-value store abstraction and payload encoding

pub mod compression;
mod repository;
mod serializer;

pub use repository::{
    scan_all, KeyTtl, MessageHandler, PersistentStore, SetOptions, StoreCommand, StoreReply,
    SubscriptionHandle, DEFAULT_SCAN_COUNT,
};
pub use serializer::{SerializationFormat, Serializer};

#[cfg(test)]
pub use repository::MockPersistentStore;
