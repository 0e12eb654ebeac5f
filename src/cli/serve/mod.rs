//! Serve command - caches, warming loop and HTTP endpoints

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::{build_socket_addr, init_logging, load_config};
use crate::api;
use crate::infrastructure::observability::{create_metrics_router, init_metrics};
use crate::infrastructure::services::WarmingScheduler;

/// Run until Ctrl+C or SIGTERM, then stop warming and drain connections
pub async fn run() -> anyhow::Result<()> {
    let config = load_config()?;
    init_logging(&config);

    let state = crate::create_app_state_with_config(&config).await?;
    let metrics = init_metrics(&config.metrics);

    let warming = WarmingScheduler::start(state.query.clone());

    let mut app: Router = api::create_router(state.clone());
    if let Some(metrics) = metrics {
        app = app.merge(create_metrics_router(&config.metrics, metrics, state.analytics.clone()));
    }

    let addr = build_socket_addr(&config)?;
    info!("Starting cache service on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = warming {
        handle.shutdown().await;
    }

    info!("Cache service shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
