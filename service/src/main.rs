//! Ratebook Binary
//!
//! Runs the rate and ledger engine: seeds the rate table, keeps it fluctuating
//! and serves the engine to in-process collaborators until Ctrl+C.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ratebook_service::{Backends, ExchangeService, ServiceConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env().map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    // Initialize logging
    let fallback = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or(fallback),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting Ratebook");

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let backends = Backends::from_config(&config.storage).await?;
    info!(
        backend = ?config.storage.backend,
        currencies = config.ledger.currencies.len(),
        "Storage ready"
    );

    let service = Arc::new(ExchangeService::new(config, backends));
    service.start().await?;

    for rate in service.get_rates().await? {
        info!(pair = %rate.pair, rate = %rate.rate, spread = %rate.spread, "Rate loaded");
    }

    info!("Ratebook running");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    service.stop().await;

    let metrics = service.metrics();
    info!(
        fluctuation_ticks = metrics.fluctuation_ticks,
        deposits = metrics.deposits,
        withdrawals = metrics.withdrawals,
        orders_created = metrics.orders_created,
        "Ratebook shutdown complete"
    );
    Ok(())
}
