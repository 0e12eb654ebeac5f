//! Deterministic feature-hashing embeddings
//!
//! Always available, needs no model or network, and gives texts that share
//! words a positive similarity. Word order and the raw text each add a small
//! feature, so only identical texts embed identically. Used as the fallback
//! provider and in tests.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::domain::embedding::{l2_normalize, EmbeddingProvider};
use crate::domain::DomainError;

pub const DEFAULT_HASH_DIMENSIONS: usize = 384;

const WORD_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.5;
const BIGRAM_WEIGHT: f32 = 0.5;
const RAW_TEXT_WEIGHT: f32 = 0.1;

#[derive(Debug, Clone)]
pub struct HashEmbeddingProvider {
    dimensions: usize,
    seed: u64,
}

impl HashEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            seed: 0,
        }
    }

    /// Different seeds give unrelated vector spaces
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.to_le_bytes());
        hasher.update(feature.as_bytes());
        let digest = hasher.finalize();

        let mut index_bytes = [0u8; 8];
        index_bytes.copy_from_slice(&digest[..8]);
        let index = (u64::from_le_bytes(index_bytes) % self.dimensions as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };

        vector[index] += sign * weight;
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        if words.is_empty() {
            self.add_feature(&mut vector, lowered.trim(), WORD_WEIGHT);
        }

        for word in &words {
            self.add_feature(&mut vector, &format!("w:{}", word), WORD_WEIGHT);

            let padded: Vec<char> = format!("#{}#", word).chars().collect();
            for trigram in padded.windows(3) {
                let trigram: String = trigram.iter().collect();
                self.add_feature(&mut vector, &format!("t:{}", trigram), TRIGRAM_WEIGHT);
            }
        }

        for pair in words.windows(2) {
            self.add_feature(&mut vector, &format!("b:{} {}", pair[0], pair[1]), BIGRAM_WEIGHT);
        }

        self.add_feature(&mut vector, &format!("r:{}", text), RAW_TEXT_WEIGHT);

        l2_normalize(&mut vector);
        vector
    }
}

impl Default for HashEmbeddingProvider {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_DIMENSIONS)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, DomainError> {
        Ok(self.vectorize(text))
    }

    fn provider_name(&self) -> &'static str {
        "hash"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
