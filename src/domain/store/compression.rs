//! Gzip helpers for large payloads

use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD, Engine};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::domain::DomainError;

pub fn gzip(bytes: &[u8]) -> Result<Vec<u8>, DomainError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .map_err(|e| DomainError::serialization(format!("Compression failed: {}", e)))?;

    encoder
        .finish()
        .map_err(|e| DomainError::serialization(format!("Compression failed: {}", e)))
}

pub fn gunzip(bytes: &[u8]) -> Result<Vec<u8>, DomainError> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();

    decoder
        .read_to_end(&mut out)
        .map_err(|e| DomainError::serialization(format!("Decompression failed: {}", e)))?;

    Ok(out)
}

/// Compresses `text` when it is larger than `threshold` bytes and gzip
/// actually shrinks it; returns the base64 form of the compressed bytes
pub fn compress_if_smaller(text: &str, threshold: usize) -> Result<Option<String>, DomainError> {
    if text.len() <= threshold {
        return Ok(None);
    }

    let compressed = gzip(text.as_bytes())?;
    let encoded = STANDARD.encode(&compressed);

    if encoded.len() >= text.len() {
        return Ok(None);
    }

    Ok(Some(encoded))
}

/// Reverses [`compress_if_smaller`]
pub fn decompress_text(encoded: &str) -> Result<String, DomainError> {
    let compressed = STANDARD
        .decode(encoded)
        .map_err(|e| DomainError::serialization(format!("Invalid compressed payload: {}", e)))?;

    String::from_utf8(gunzip(&compressed)?)
        .map_err(|e| DomainError::serialization(format!("Compressed payload is not UTF-8: {}", e)))
}
