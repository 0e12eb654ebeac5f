use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::embedding::EmbeddingProvider;
use crate::domain::DomainError;

/// Memoizes vectors per text in front of another provider
#[derive(Debug)]
pub struct CachedEmbeddingProvider {
    inner: Arc<dyn EmbeddingProvider>,
    cache: Cache<String, Arc<Vec<f32>>>,
}

impl CachedEmbeddingProvider {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, capacity: u64) -> Self {
        let cache = Cache::builder().max_capacity(capacity).build();

        Self { inner, cache }
    }

    pub fn with_ttl(inner: Arc<dyn EmbeddingProvider>, capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(capacity)
            .build();

        Self { inner, cache }
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn cache_size(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, DomainError> {
        if let Some(cached) = self.cache.get(text).await {
            tracing::trace!(provider = self.inner.provider_name(), "Embedding memo hit");
            return Ok((*cached).clone());
        }

        let vector = self.inner.embed(text).await?;
        self.cache
            .insert(text.to_string(), Arc::new(vector.clone()))
            .await;

        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DomainError> {
        let mut vectors: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut missing = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            match self.cache.get(text).await {
                Some(cached) => vectors.push(Some((*cached).clone())),
                None => {
                    vectors.push(None);
                    missing.push(i);
                }
            }
        }

        if !missing.is_empty() {
            let to_embed: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let fresh = self.inner.embed_batch(&to_embed).await?;

            if fresh.len() != to_embed.len() {
                return Err(DomainError::embedding(
                    self.inner.provider_name(),
                    format!("Expected {} embeddings, received {}", to_embed.len(), fresh.len()),
                ));
            }

            for (i, vector) in missing.into_iter().zip(fresh) {
                self.cache
                    .insert(texts[i].clone(), Arc::new(vector.clone()))
                    .await;
                vectors[i] = Some(vector);
            }
        }

        Ok(vectors.into_iter().flatten().collect())
    }

    fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}
