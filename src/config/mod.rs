//! Application configuration loaded from files and the environment

mod app_config;

pub use app_config::{AppConfig, LogFormat, LoggingConfig, ServerConfig};
