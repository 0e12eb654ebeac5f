//! Health command - one-shot check for scripts and probes

use clap::Args;

use super::{init_logging, load_config};
use crate::domain::{HealthReport, HealthStatus};
use crate::infrastructure::store::StoreFactory;

#[derive(Args, Debug)]
pub struct HealthArgs {
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Only connect to the store, without building the caches
    #[arg(long)]
    pub store_only: bool,
}

/// Exits with an error when the merged status is unhealthy
pub async fn run(args: HealthArgs) -> anyhow::Result<()> {
    let config = load_config()?;
    init_logging(&config);

    let report = if args.store_only {
        let store = StoreFactory::create(&config.store).await?;
        HealthReport::healthy().merge("store", store.health_check().await)
    } else {
        let state = crate::create_app_state_with_config(&config).await?;
        HealthReport::healthy()
            .merge("store", state.store.health_check().await)
            .merge("semantic", state.semantic.health().await)
            .merge("query", state.query.health().await)
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("status: {}", report.status);
        for (key, value) in &report.details {
            println!("  {}: {}", key, value);
        }
    }

    if report.status == HealthStatus::Unhealthy {
        anyhow::bail!("health check failed: {}", report.status);
    }

    Ok(())
}
