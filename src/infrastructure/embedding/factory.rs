//! Embedding provider factory for runtime provider selection

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use super::cached::CachedEmbeddingProvider;
use super::hash::{HashEmbeddingProvider, DEFAULT_HASH_DIMENSIONS};
use super::http_client::HttpClient;
use super::openai::{OpenAiEmbeddingProvider, DEFAULT_OPENAI_MODEL};
use crate::domain::embedding::EmbeddingProvider;
use crate::domain::DomainError;

/// Supported embedding providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingBackend {
    #[default]
    Hash,
    OpenAi,
    Local,
}

impl std::fmt::Display for EmbeddingBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingBackend::Hash => write!(f, "hash"),
            EmbeddingBackend::OpenAi => write!(f, "openai"),
            EmbeddingBackend::Local => write!(f, "local"),
        }
    }
}

impl std::str::FromStr for EmbeddingBackend {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hash" | "mock" => Ok(EmbeddingBackend::Hash),
            "openai" | "remote" => Ok(EmbeddingBackend::OpenAi),
            "local" | "fastembed" => Ok(EmbeddingBackend::Local),
            _ => Err(DomainError::backend_not_available("embedding provider", s)),
        }
    }
}

/// `[embedding]` configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingSettings {
    /// `hash`, `openai` or `local`
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Provider model name; each provider has its own default
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dimensions: Option<usize>,
    /// Seed for the hash provider
    #[serde(default)]
    pub seed: u64,
    /// Environment variable holding the remote API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Memoized vectors; 0 disables memoization
    #[serde(default = "default_memo_capacity")]
    pub memo_capacity: u64,
}

fn default_provider() -> String {
    EmbeddingBackend::Hash.to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_memo_capacity() -> u64 {
    10_000
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dimensions: None,
            seed: 0,
            api_key_env: default_api_key_env(),
            base_url: None,
            timeout_secs: default_timeout_secs(),
            memo_capacity: default_memo_capacity(),
        }
    }
}

impl EmbeddingSettings {
    pub fn hash() -> Self {
        Self::default()
    }

    pub fn openai() -> Self {
        Self {
            provider: EmbeddingBackend::OpenAi.to_string(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_memo_capacity(mut self, capacity: u64) -> Self {
        self.memo_capacity = capacity;
        self
    }

    pub fn backend(&self) -> Result<EmbeddingBackend, DomainError> {
        self.provider.parse()
    }
}

/// Factory for creating embedding providers
#[derive(Debug, Default)]
pub struct EmbeddingFactory;

impl EmbeddingFactory {
    pub fn create(settings: &EmbeddingSettings) -> Result<Arc<dyn EmbeddingProvider>, DomainError> {
        let backend = settings.backend()?;

        let provider: Arc<dyn EmbeddingProvider> = match backend {
            EmbeddingBackend::Hash => Arc::new(
                HashEmbeddingProvider::new(settings.dimensions.unwrap_or(DEFAULT_HASH_DIMENSIONS))
                    .with_seed(settings.seed),
            ),
            EmbeddingBackend::OpenAi => Arc::new(Self::create_openai(settings)?),
            EmbeddingBackend::Local => Self::create_local(settings)?,
        };

        info!(
            provider = %backend,
            dimensions = provider.dimensions(),
            memo_capacity = settings.memo_capacity,
            "Embedding provider ready"
        );

        if settings.memo_capacity == 0 {
            return Ok(provider);
        }

        Ok(Arc::new(CachedEmbeddingProvider::new(
            provider,
            settings.memo_capacity,
        )))
    }

    fn create_openai(
        settings: &EmbeddingSettings,
    ) -> Result<OpenAiEmbeddingProvider<HttpClient>, DomainError> {
        let api_key = std::env::var(&settings.api_key_env).map_err(|_| {
            DomainError::configuration(format!(
                "Environment variable {} is required for the openai embedding provider",
                settings.api_key_env
            ))
        })?;

        let client = HttpClient::with_timeout(Duration::from_secs(settings.timeout_secs.max(1)))?;

        let mut provider = match &settings.base_url {
            Some(base_url) => OpenAiEmbeddingProvider::with_base_url(client, api_key, base_url),
            None => OpenAiEmbeddingProvider::new(client, api_key),
        }
        .with_model(settings.model.as_deref().unwrap_or(DEFAULT_OPENAI_MODEL));

        if let Some(dimensions) = settings.dimensions {
            provider = provider.with_dimensions(dimensions);
        }

        Ok(provider)
    }

    #[cfg(feature = "local-embeddings")]
    fn create_local(
        settings: &EmbeddingSettings,
    ) -> Result<Arc<dyn EmbeddingProvider>, DomainError> {
        use super::local::{LocalEmbeddingModel, LocalEmbeddingProvider};

        let model = match &settings.model {
            Some(name) => name.parse()?,
            None => LocalEmbeddingModel::AllMiniLmL6V2,
        };

        Ok(Arc::new(LocalEmbeddingProvider::new(model)?))
    }

    #[cfg(not(feature = "local-embeddings"))]
    fn create_local(
        settings: &EmbeddingSettings,
    ) -> Result<Arc<dyn EmbeddingProvider>, DomainError> {
        Err(DomainError::backend_not_available(
            "embedding provider",
            format!(
                "{} (built without the local-embeddings feature)",
                settings.provider
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_str() {
        assert_eq!("hash".parse::<EmbeddingBackend>().unwrap(), EmbeddingBackend::Hash);
        assert_eq!("OpenAI".parse::<EmbeddingBackend>().unwrap(), EmbeddingBackend::OpenAi);
        assert_eq!("local".parse::<EmbeddingBackend>().unwrap(), EmbeddingBackend::Local);
        assert!(matches!(
            "cohere".parse::<EmbeddingBackend>(),
            Err(DomainError::BackendNotAvailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_hash_provider() {
        let provider = EmbeddingFactory::create(&EmbeddingSettings::hash().with_dimensions(64))
            .unwrap();

        assert_eq!(provider.provider_name(), "hash");
        assert_eq!(provider.dimensions(), 64);
        assert_eq!(provider.embed("hello").await.unwrap().len(), 64);
    }

    #[test]
    fn test_create_without_memo() {
        let provider =
            EmbeddingFactory::create(&EmbeddingSettings::hash().with_memo_capacity(0)).unwrap();
        assert_eq!(provider.dimensions(), DEFAULT_HASH_DIMENSIONS);
    }

    #[test]
    fn test_openai_requires_api_key() {
        let settings = EmbeddingSettings {
            api_key_env: "PMP_RESULT_CACHE_TEST_MISSING_KEY".to_string(),
            ..EmbeddingSettings::openai()
        };

        let err = EmbeddingFactory::create(&settings).unwrap_err();
        assert!(matches!(err, DomainError::Configuration { .. }));
    }

    #[cfg(not(feature = "local-embeddings"))]
    #[test]
    fn test_local_without_feature_is_not_available() {
        let settings = EmbeddingSettings {
            provider: "local".to_string(),
            ..Default::default()
        };

        let err = EmbeddingFactory::create(&settings).unwrap_err();
        assert!(matches!(err, DomainError::BackendNotAvailable { .. }));
    }

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let settings: EmbeddingSettings =
            serde_json::from_str(r#"{"provider": "openai", "dimensions": 256}"#).unwrap();

        assert_eq!(settings.backend().unwrap(), EmbeddingBackend::OpenAi);
        assert_eq!(settings.dimensions, Some(256));
        assert_eq!(settings.api_key_env, "OPENAI_API_KEY");
        assert_eq!(settings.memo_capacity, 10_000);
    }
}
