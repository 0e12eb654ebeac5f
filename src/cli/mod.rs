//! CLI module
//!
//! - `serve`: caches plus the health, stats and metrics endpoints
//! - `health`: one-shot health check of the configured store and caches

pub mod health;
pub mod serve;

use std::net::SocketAddr;

use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::infrastructure::logging;

/// PMP Result Cache - two-tier semantic and query result cache
#[derive(Parser)]
#[command(name = "pmp-result-cache")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the cache service with health and metrics endpoints
    Serve,

    /// Check the configured store and caches, then exit
    Health(health::HealthArgs),
}

fn load_config() -> anyhow::Result<AppConfig> {
    dotenvy::dotenv().ok();

    Ok(AppConfig::load()?)
}

fn init_logging(config: &AppConfig) {
    logging::init_logging(&config.logging);
}

fn build_socket_addr(config: &AppConfig) -> anyhow::Result<SocketAddr> {
    Ok(SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    )))
}
