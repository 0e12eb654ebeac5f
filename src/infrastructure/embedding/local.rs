//! On-device embeddings via fastembed

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::info;

use crate::domain::embedding::EmbeddingProvider;
use crate::domain::DomainError;

/// Supported local models
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalEmbeddingModel {
    /// all-MiniLM-L6-v2, 384 dims
    AllMiniLmL6V2,
    /// BGE-small-en v1.5, 384 dims
    BgeSmallEn,
    /// BGE-base-en v1.5, 768 dims
    BgeBaseEn,
}

impl LocalEmbeddingModel {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AllMiniLmL6V2 => "all-MiniLM-L6-v2",
            Self::BgeSmallEn => "BGE-small-en",
            Self::BgeBaseEn => "BGE-base-en",
        }
    }

    pub fn dimensions(&self) -> usize {
        match self {
            Self::AllMiniLmL6V2 | Self::BgeSmallEn => 384,
            Self::BgeBaseEn => 768,
        }
    }
}

impl std::str::FromStr for LocalEmbeddingModel {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all-minilm-l6-v2" | "minilm" => Ok(Self::AllMiniLmL6V2),
            "bge-small-en" | "bge-small" => Ok(Self::BgeSmallEn),
            "bge-base-en" | "bge-base" => Ok(Self::BgeBaseEn),
            _ => Err(DomainError::backend_not_available("local embedding model", s)),
        }
    }
}

impl From<LocalEmbeddingModel> for fastembed::EmbeddingModel {
    fn from(model: LocalEmbeddingModel) -> Self {
        match model {
            LocalEmbeddingModel::AllMiniLmL6V2 => fastembed::EmbeddingModel::AllMiniLML6V2,
            LocalEmbeddingModel::BgeSmallEn => fastembed::EmbeddingModel::BGESmallENV15,
            LocalEmbeddingModel::BgeBaseEn => fastembed::EmbeddingModel::BGEBaseENV15,
        }
    }
}

/// Runs inference on the blocking pool so the async workers stay free
pub struct LocalEmbeddingProvider {
    model: Arc<Mutex<fastembed::TextEmbedding>>,
    kind: LocalEmbeddingModel,
}

impl std::fmt::Debug for LocalEmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEmbeddingProvider")
            .field("model", &self.kind.name())
            .finish()
    }
}

impl LocalEmbeddingProvider {
    /// Loads the model, downloading it into the fastembed cache on first use
    pub fn new(kind: LocalEmbeddingModel) -> Result<Self, DomainError> {
        let options = fastembed::InitOptions::new(kind.into()).with_show_download_progress(false);

        let model = fastembed::TextEmbedding::try_new(options).map_err(|e| {
            DomainError::configuration(format!("Failed to load embedding model: {}", e))
        })?;

        info!(model = kind.name(), "Local embedding model loaded");

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            kind,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, DomainError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;

        vectors
            .pop()
            .ok_or_else(|| DomainError::embedding("local", "No embedding returned"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DomainError> {
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| DomainError::embedding("local", "Model lock poisoned"))?;

            model
                .embed(texts, None)
                .map_err(|e| DomainError::embedding("local", format!("Embedding failed: {}", e)))
        })
        .await
        .map_err(|e| DomainError::embedding("local", format!("Embedding task failed: {}", e)))?
    }

    fn provider_name(&self) -> &'static str {
        "local"
    }

    fn dimensions(&self) -> usize {
        self.kind.dimensions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_from_str() {
        assert_eq!(
            "all-MiniLM-L6-v2".parse::<LocalEmbeddingModel>().unwrap(),
            LocalEmbeddingModel::AllMiniLmL6V2
        );
        assert_eq!(
            "bge-base".parse::<LocalEmbeddingModel>().unwrap().dimensions(),
            768
        );
        assert!("gpt-embed".parse::<LocalEmbeddingModel>().is_err());
    }

    #[tokio::test]
    #[ignore = "Downloads model weights"]
    async fn test_local_embeddings() {
        let provider = LocalEmbeddingProvider::new(LocalEmbeddingModel::AllMiniLmL6V2).unwrap();
        let a = provider.embed("reset my password").await.unwrap();
        let b = provider.embed("I forgot my password").await.unwrap();

        assert_eq!(a.len(), 384);
        assert!(provider.similarity(&a, &b) > 0.5);
    }
}
