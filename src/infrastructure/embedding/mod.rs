//! Embedding provider implementations

mod cached;
mod factory;
mod hash;
mod http_client;
#[cfg(feature = "local-embeddings")]
mod local;
mod openai;

pub use cached::CachedEmbeddingProvider;
pub use factory::{EmbeddingBackend, EmbeddingFactory, EmbeddingSettings};
pub use hash::{HashEmbeddingProvider, DEFAULT_HASH_DIMENSIONS};
pub use http_client::{HttpClient, HttpClientTrait};
#[cfg(feature = "local-embeddings")]
pub use local::{LocalEmbeddingModel, LocalEmbeddingProvider};
pub use openai::{model_dimensions, OpenAiEmbeddingProvider, DEFAULT_OPENAI_MODEL};
