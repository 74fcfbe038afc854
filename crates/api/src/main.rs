use anyhow::Context;
use tokio_util::sync::CancellationToken;

use stockroom_infra::{InventoryConfig, ReservationReaper};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockroom_observability::init();

    let config = InventoryConfig::from_env().context("invalid configuration")?;
    let service = stockroom_api::app::services::build_service(&config).await?;

    let shutdown = CancellationToken::new();
    let reaper = match config.reservation_hold {
        Some(_) => Some(ReservationReaper::new(service.clone(), config.reaper_interval).spawn(&shutdown)),
        None => {
            tracing::info!("reservation hold disabled; reaper not started");
            None
        }
    };

    let app = stockroom_api::app::build_app(service);
    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_addr))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(reaper) = reaper {
        reaper.shutdown().await;
    }
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
