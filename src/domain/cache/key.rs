//! Cache key generation and query fingerprinting

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::DomainError;

/// Default number of leading-dimension buckets for semantic keys
pub const DEFAULT_NUM_BUCKETS: usize = 100;

/// Decimal places kept when hashing an embedding
const EMBEDDING_QUANTIZATION: f32 = 10_000.0;

/// Canonical token that every parameter placeholder collapses to
const PLACEHOLDER: &str = "?";

static LINE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"--[^\n]*").expect("valid regex"));
static BLOCK_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("valid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static PYFORMAT_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%\([a-z_][a-z0-9_]*\)s|%s").expect("valid regex"));
static NUMBERED_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\d+").expect("valid regex"));
static NAMED_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|[^:]):[a-z_][a-z0-9_]*").expect("valid regex"));
static BRACE_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{[a-z_][a-z0-9_]*\}").expect("valid regex"));

/// Three independent hashes identifying a query result
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryFingerprint {
    /// Hash of the normalized query text
    pub query_hash: String,
    /// Hash of the canonicalized parameters
    pub parameter_hash: String,
    /// Hash of the canonicalized result
    pub content_hash: String,
}

/// Derives persisted keys and fingerprints
///
/// Semantic keys look like `{prefix}:bucket_042:{embedding16}:{text8}`,
/// query keys like `{prefix}:{query16}:{params16}`.
#[derive(Debug, Clone)]
pub struct CacheKeyGenerator {
    prefix: String,
    num_buckets: usize,
}

impl CacheKeyGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            num_buckets: DEFAULT_NUM_BUCKETS,
        }
    }

    pub fn with_num_buckets(mut self, num_buckets: usize) -> Self {
        self.num_buckets = num_buckets.max(1);
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn num_buckets(&self) -> usize {
        self.num_buckets
    }

    /// Quantizes the leading dimension (expected in [-1, 1]) into a bucket index
    pub fn bucket_for(&self, embedding: &[f32]) -> usize {
        let Some(&leading) = embedding.first() else {
            return 0;
        };

        if !leading.is_finite() {
            return 0;
        }

        let scaled = ((leading.clamp(-1.0, 1.0) + 1.0) / 2.0) * self.num_buckets as f32;
        (scaled.floor() as usize).min(self.num_buckets - 1)
    }

    /// Buckets within `radius` of `bucket`, nearest first
    pub fn neighbouring_buckets(&self, bucket: usize, radius: usize) -> Vec<usize> {
        let mut buckets = vec![bucket];

        for distance in 1..=radius {
            if let Some(below) = bucket.checked_sub(distance) {
                buckets.push(below);
            }
            if bucket + distance < self.num_buckets {
                buckets.push(bucket + distance);
            }
        }

        buckets
    }

    pub fn bucket_prefix(&self, bucket: usize) -> String {
        format!("{}:bucket_{:03}", self.prefix, bucket)
    }

    /// Glob pattern matching every semantic key in a bucket
    pub fn bucket_pattern(&self, bucket: usize) -> String {
        format!("{}:*", self.bucket_prefix(bucket))
    }

    /// Glob pattern matching every key under this prefix
    pub fn prefix_pattern(&self) -> String {
        format!("{}:*", self.prefix)
    }

    pub fn semantic_key(&self, embedding: &[f32], text: Option<&str>) -> String {
        let bucket = self.bucket_prefix(self.bucket_for(embedding));
        let embedding_hash = embedding_hash(embedding);

        match text {
            Some(text) => format!(
                "{}:{}:{}",
                bucket,
                &embedding_hash[..16],
                &sha256_hex(text.as_bytes())[..8]
            ),
            None => format!("{}:{}", bucket, &embedding_hash[..16]),
        }
    }

    pub fn query_key(&self, query: &str, params: &serde_json::Value) -> Result<String, DomainError> {
        let query_hash = hash_query(query);
        let parameter_hash = hash_json(params)?;

        Ok(format!(
            "{}:{}:{}",
            self.prefix,
            &query_hash[..16],
            &parameter_hash[..16]
        ))
    }

    pub fn fingerprint(
        &self,
        query: &str,
        params: &serde_json::Value,
        result: &serde_json::Value,
    ) -> Result<QueryFingerprint, DomainError> {
        Ok(QueryFingerprint {
            query_hash: hash_query(query),
            parameter_hash: hash_json(params)?,
            content_hash: hash_json(result)?,
        })
    }
}

/// Strips comments, collapses whitespace, lowercases and replaces
/// parameter placeholders (`?`, `$1`, `:name`, `%s`, `%(name)s`, `{name}`)
/// with a single canonical token
pub fn normalize_query(query: &str) -> String {
    let without_comments = BLOCK_COMMENT.replace_all(query, " ");
    let without_comments = LINE_COMMENT.replace_all(&without_comments, " ");
    let lowered = without_comments.to_lowercase();

    let replaced = PYFORMAT_PLACEHOLDER.replace_all(&lowered, PLACEHOLDER);
    let replaced = NUMBERED_PLACEHOLDER.replace_all(&replaced, PLACEHOLDER);
    let replaced = NAMED_PLACEHOLDER.replace_all(&replaced, "${1}?");
    let replaced = BRACE_PLACEHOLDER.replace_all(&replaced, PLACEHOLDER);

    WHITESPACE.replace_all(&replaced, " ").trim().to_string()
}

/// Serializes JSON with object keys in sorted order
pub fn canonical_json(value: &serde_json::Value) -> Result<String, DomainError> {
    serde_json::to_string(&sort_keys(value))
        .map_err(|e| DomainError::serialization(format!("Failed to canonicalize JSON: {}", e)))
}

fn sort_keys(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut fields: Vec<_> = map.iter().collect();
            fields.sort_by(|a, b| a.0.cmp(b.0));

            serde_json::Value::Object(
                fields
                    .into_iter()
                    .map(|(key, value)| (key.clone(), sort_keys(value)))
                    .collect(),
            )
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(sort_keys).collect())
        }
        other => other.clone(),
    }
}

pub fn hash_query(query: &str) -> String {
    sha256_hex(normalize_query(query).as_bytes())
}

pub fn hash_json(value: &serde_json::Value) -> Result<String, DomainError> {
    Ok(sha256_hex(canonical_json(value)?.as_bytes()))
}

fn embedding_hash(embedding: &[f32]) -> String {
    let mut hasher = Sha256::new();

    for value in embedding {
        let quantized = (value * EMBEDDING_QUANTIZATION).round() as i32;
        hasher.update(quantized.to_le_bytes());
    }

    hex::encode(hasher.finalize())
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
