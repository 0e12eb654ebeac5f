//! OpenAI-compatible remote embedding provider

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::HttpClientTrait;
use crate::domain::embedding::EmbeddingProvider;
use crate::domain::DomainError;

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";

/// Known OpenAI embedding models and their native dimensions
const EMBEDDING_MODELS: &[(&str, usize)] = &[
    ("text-embedding-3-small", 1536),
    ("text-embedding-3-large", 3072),
    ("text-embedding-ada-002", 1536),
];

/// Native vector length of a known model
pub fn model_dimensions(model: &str) -> Option<usize> {
    EMBEDDING_MODELS
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, dims)| *dims)
}

/// Calls `POST {base_url}/v1/embeddings`
#[derive(Debug)]
pub struct OpenAiEmbeddingProvider<C: HttpClientTrait> {
    client: C,
    auth_header: String,
    base_url: String,
    model: String,
    dimensions: usize,
    /// Sent as `dimensions` when it differs from the model's native size
    shortened: bool,
}

impl<C: HttpClientTrait> OpenAiEmbeddingProvider<C> {
    pub fn new(client: C, api_key: impl Into<String>) -> Self {
        Self::with_base_url(client, api_key, DEFAULT_OPENAI_BASE_URL)
    }

    pub fn with_base_url(
        client: C,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        let auth_header = format!("Bearer {}", api_key.into());
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let dimensions = model_dimensions(DEFAULT_OPENAI_MODEL).unwrap_or(1536);

        Self {
            client,
            auth_header,
            base_url,
            model: DEFAULT_OPENAI_MODEL.to_string(),
            dimensions,
            shortened: false,
        }
    }

    /// Switches model; unknown models must be followed by `with_dimensions`
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        if let Some(dims) = model_dimensions(&self.model) {
            self.dimensions = dims;
            self.shortened = false;
        }
        self
    }

    /// Requests shortened vectors (text-embedding-3 models) or declares the size of an unknown model
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.shortened = model_dimensions(&self.model).is_some_and(|native| native != dimensions);
        self.dimensions = dimensions;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn embeddings_url(&self) -> String {
        format!("{}/v1/embeddings", self.base_url)
    }

    fn headers(&self) -> Vec<(&str, &str)> {
        vec![
            ("Authorization", self.auth_header.as_str()),
            ("Content-Type", "application/json"),
        ]
    }

    fn build_request(&self, texts: &[String]) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        if self.shortened {
            body["dimensions"] = serde_json::json!(self.dimensions);
        }

        body
    }

    fn parse_response(
        &self,
        json: serde_json::Value,
        expected: usize,
    ) -> Result<Vec<Vec<f32>>, DomainError> {
        let mut response: OpenAiEmbeddingResponse = serde_json::from_value(json).map_err(|e| {
            DomainError::embedding("openai", format!("Failed to parse embedding response: {}", e))
        })?;

        if response.data.len() != expected {
            return Err(DomainError::embedding(
                "openai",
                format!(
                    "Expected {} embeddings, received {}",
                    expected,
                    response.data.len()
                ),
            ));
        }

        response.data.sort_by_key(|d| d.index);

        response
            .data
            .into_iter()
            .map(|d| {
                if d.embedding.len() != self.dimensions {
                    return Err(DomainError::embedding(
                        "openai",
                        format!(
                            "Expected {} dimensions, received {}",
                            self.dimensions,
                            d.embedding.len()
                        ),
                    ));
                }
                Ok(d.embedding)
            })
            .collect()
    }
}

#[async_trait]
impl<C: HttpClientTrait> EmbeddingProvider for OpenAiEmbeddingProvider<C> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, DomainError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;

        vectors
            .pop()
            .ok_or_else(|| DomainError::embedding("openai", "No embedding returned"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DomainError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.embeddings_url();
        let body = self.build_request(texts);

        debug!(model = %self.model, inputs = texts.len(), "Requesting embeddings");

        let response = self
            .client
            .post_json(&url, self.headers(), &body)
            .await
            .map_err(|e| match e {
                DomainError::Embedding { message, .. } => DomainError::embedding("openai", message),
                other => other,
            })?;

        self.parse_response(response, texts.len())
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}
