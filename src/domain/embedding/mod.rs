//! Embedding provider trait and similarity scoring

mod provider;
mod similarity;

pub use provider::EmbeddingProvider;
pub use similarity::{batch_cosine_similarity, cosine_similarity, l2_normalize};

#[cfg(test)]
pub use provider::mock::MockEmbeddingProvider;
