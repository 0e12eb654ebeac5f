use thiserror::Error;

/// Core domain errors
#[derive(Debug, Error)]
pub enum DomainError {
    /// Remote tier unreachable
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Protocol-level failure reported by the remote tier
    #[error("Store error: {message}")]
    Store { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Embedding error: {provider} - {message}")]
    Embedding { provider: String, message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Backend not available: {kind} '{name}'")]
    BackendNotAvailable { kind: String, name: String },

    /// A caller-supplied compute function failed
    #[error("Compute error: {message}")]
    Compute { message: String },

    #[error("Analytics recording error: {message}")]
    AnalyticsRecording { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DomainError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn embedding(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Embedding {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn backend_not_available(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::BackendNotAvailable {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn compute(message: impl Into<String>) -> Self {
        Self::Compute {
            message: message.into(),
        }
    }

    pub fn analytics(message: impl Into<String>) -> Self {
        Self::AnalyticsRecording {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True when the remote tier could not be reached at all
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// True for any failure that means "remote tier unavailable" rather than a miss
    pub fn is_tier_unavailable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Store { .. })
    }
}
