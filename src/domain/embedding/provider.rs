//! Embedding provider trait definition

use async_trait::async_trait;
use std::fmt::Debug;

use super::similarity::{batch_cosine_similarity, cosine_similarity};
use crate::domain::DomainError;

/// Computes fixed-dimension vectors for text (remote API, local model, hash)
#[async_trait]
pub trait EmbeddingProvider: Send + Sync + Debug {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, DomainError>;

    /// Embed several texts; order of the output matches the input
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DomainError> {
        let mut vectors = Vec::with_capacity(texts.len());

        for text in texts {
            vectors.push(self.embed(text).await?);
        }

        Ok(vectors)
    }

    /// Get the provider name
    fn provider_name(&self) -> &'static str;

    /// Length of every vector this provider returns
    fn dimensions(&self) -> usize;

    fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        cosine_similarity(a, b)
    }

    fn batch_similarity(&self, query: &[f32], candidates: &[Vec<f32>]) -> Vec<f32> {
        batch_cosine_similarity(query, candidates)
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider returning pinned vectors per text, for tests that need exact similarities
    #[derive(Debug)]
    pub struct MockEmbeddingProvider {
        dimensions: usize,
        vectors: HashMap<String, Vec<f32>>,
        error: Option<String>,
        calls: AtomicUsize,
    }

    impl MockEmbeddingProvider {
        pub fn new(dimensions: usize) -> Self {
            Self {
                dimensions,
                vectors: HashMap::new(),
                error: None,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn with_vector(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
            self.vectors.insert(text.into(), vector);
            self
        }

        pub fn with_error(mut self, error: impl Into<String>) -> Self {
            self.error = Some(error.into());
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EmbeddingProvider for MockEmbeddingProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, DomainError> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if let Some(ref error) = self.error {
                return Err(DomainError::embedding("mock", error));
            }

            if let Some(vector) = self.vectors.get(text) {
                return Ok(vector.clone());
            }

            // Unpinned text gets a vector derived from its bytes
            let hash = text.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
            Ok((0..self.dimensions)
                .map(|i| ((hash.wrapping_add(i as u64 * 7919) % 1000) as f32 / 1000.0) - 0.5)
                .collect())
        }

        fn provider_name(&self) -> &'static str {
            "mock"
        }

        fn dimensions(&self) -> usize {
            self.dimensions
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_pinned_vector() {
            let provider = MockEmbeddingProvider::new(2).with_vector("a", vec![1.0, 0.0]);

            assert_eq!(provider.embed("a").await.unwrap(), vec![1.0, 0.0]);
            assert_eq!(provider.embed("b").await.unwrap().len(), 2);
            assert_eq!(provider.calls(), 2);
        }

        #[tokio::test]
        async fn test_default_batch_uses_embed() {
            let provider = MockEmbeddingProvider::new(4);
            let vectors = provider
                .embed_batch(&["x".to_string(), "y".to_string()])
                .await
                .unwrap();

            assert_eq!(vectors.len(), 2);
            assert_eq!(provider.calls(), 2);
        }

        #[tokio::test]
        async fn test_error() {
            let provider = MockEmbeddingProvider::new(4).with_error("quota exceeded");
            let result = provider.embed("x").await;

            assert!(matches!(result, Err(DomainError::Embedding { .. })));
        }
    }
}
