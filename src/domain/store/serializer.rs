//! Cache payload serialization
//!
//! Every encoded payload starts with a one-byte format tag, so a reader
//! configured for one format still decodes records written in another.

use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::compression::{gzip, gunzip};
use crate::domain::DomainError;

const TAG_JSON: u8 = b'J';
const TAG_BINARY: u8 = b'B';
const TAG_COMPRESSED: u8 = b'Z';

/// Wire format for persisted records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializationFormat {
    /// Human-readable JSON
    #[default]
    Json,
    /// Compact bincode
    Binary,
    /// Gzip-compressed bincode
    Compressed,
}

impl SerializationFormat {
    fn tag(&self) -> u8 {
        match self {
            Self::Json => TAG_JSON,
            Self::Binary => TAG_BINARY,
            Self::Compressed => TAG_COMPRESSED,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            TAG_JSON => Some(Self::Json),
            TAG_BINARY => Some(Self::Binary),
            TAG_COMPRESSED => Some(Self::Compressed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SerializationFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Binary => write!(f, "binary"),
            Self::Compressed => write!(f, "compressed"),
        }
    }
}

impl FromStr for SerializationFormat {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "binary" | "bincode" => Ok(Self::Binary),
            "compressed" | "gzip" => Ok(Self::Compressed),
            _ => Err(DomainError::configuration(format!(
                "Unknown serialization format: {}. Valid formats: json, binary, compressed",
                s
            ))),
        }
    }
}

/// Encodes and decodes cache records
#[derive(Debug, Clone, Copy, Default)]
pub struct Serializer {
    format: SerializationFormat,
}

impl Serializer {
    pub fn new(format: SerializationFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> SerializationFormat {
        self.format
    }

    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, DomainError> {
        let body = match self.format {
            SerializationFormat::Json => serde_json::to_vec(value).map_err(|e| {
                DomainError::serialization(format!("Failed to encode JSON payload: {}", e))
            })?,
            SerializationFormat::Binary => encode_binary(value)?,
            SerializationFormat::Compressed => gzip(&encode_binary(value)?)?,
        };

        let mut bytes = Vec::with_capacity(body.len() + 1);
        bytes.push(self.format.tag());
        bytes.extend_from_slice(&body);

        Ok(bytes)
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, DomainError> {
        let (tag, body) = bytes
            .split_first()
            .ok_or_else(|| DomainError::serialization("Empty payload"))?;

        let format = SerializationFormat::from_tag(*tag).ok_or_else(|| {
            DomainError::serialization(format!("Unknown payload format tag: 0x{:02x}", tag))
        })?;

        match format {
            SerializationFormat::Json => serde_json::from_slice(body).map_err(|e| {
                DomainError::serialization(format!("Failed to decode JSON payload: {}", e))
            }),
            SerializationFormat::Binary => decode_binary(body),
            SerializationFormat::Compressed => decode_binary(&gunzip(body)?),
        }
    }
}

fn encode_binary<T: Serialize>(value: &T) -> Result<Vec<u8>, DomainError> {
    bincode::serialize(value)
        .map_err(|e| DomainError::serialization(format!("Failed to encode binary payload: {}", e)))
}

fn decode_binary<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DomainError> {
    bincode::deserialize(bytes)
        .map_err(|e| DomainError::serialization(format!("Failed to decode binary payload: {}", e)))
}
