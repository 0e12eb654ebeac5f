use serde::Deserialize;

use crate::domain::analytics::AnalyticsConfig;
use crate::domain::{QueryCacheConfig, SemanticCacheConfig};
use crate::infrastructure::embedding::EmbeddingSettings;
use crate::infrastructure::observability::MetricsConfig;
use crate::infrastructure::store::StoreSettings;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub embedding: EmbeddingSettings,
    #[serde(default)]
    pub semantic: SemanticCacheConfig,
    #[serde(default)]
    pub query: QueryCacheConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9090
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

impl AppConfig {
    /// Merges `config/default`, `config/local` and `APP__*` variables
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DedupStrategy, WarmingStrategy};

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.store.backend, "memory");
        assert_eq!(config.embedding.provider, "hash");
        assert!((config.semantic.similarity_threshold - 0.85).abs() < f32::EPSILON);
        assert_eq!(config.query.dedup_strategy, DedupStrategy::ContentHash);
    }

    #[test]
    fn test_sections_deserialize_from_toml_source() {
        let source = r#"
            [server]
            port = 8088

            [logging]
            format = "json"

            [store]
            backend = "redis"
            url = "redis://cache:6379"

            [query]
            warming_strategy = "scheduled"
            dedup_strategy = "parameterized"

            [analytics]
            min_hit_rate = 0.6
        "#;

        let config: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.server.port, 8088);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.store.url, "redis://cache:6379");
        assert_eq!(config.query.warming_strategy, WarmingStrategy::Scheduled);
        assert_eq!(config.query.dedup_strategy, DedupStrategy::Parameterized);
        assert_eq!(config.analytics.min_hit_rate, Some(0.6));
        assert_eq!(config.analytics.alert_rules().len(), 1);
    }
}
