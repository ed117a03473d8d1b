//! Run command: preflight checks, then the trading loop until Ctrl+C.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use forex_gridbot::config::{Config, Environment};
use forex_gridbot::planner;
use forex_gridbot::{OandaClient, Scheduler};

pub fn run(config_path: String) -> Result<()> {
    dotenv::dotenv().ok();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(run_async(config_path))
}

async fn run_async(config_path: String) -> Result<()> {
    let config = Config::from_file(&config_path)
        .with_context(|| format!("failed to load config from {config_path}"))?;

    info!("{}", "=".repeat(60));
    info!("FOREX GRID BOT - {} environment", config.account.environment);
    info!(
        "instrument {} | range {}-{} | {} grids ({:.2} pips) | {} units/trade",
        config.trading.instrument,
        config.trading.lower_level,
        config.trading.upper_level,
        config.trading.number_of_grids,
        planner::spacing_pips(
            config.trading.lower_level,
            config.trading.upper_level,
            config.trading.number_of_grids
        ),
        config.trading.units_per_trade,
    );
    info!(
        "max loss {} | max positions {} | max spread {} pips | every {}s",
        config.risk.max_loss,
        config.risk.max_open_positions,
        config.risk.max_spread_pips,
        config.monitoring.check_interval_seconds,
    );
    info!("{}", "=".repeat(60));

    if config.account.environment == Environment::Live {
        warn!("LIVE TRADING - REAL MONEY AT RISK");
        warn!("press Ctrl+C within 10 seconds to abort");
        for i in (1..=10).rev() {
            info!("starting in {i} seconds...");
            sleep(Duration::from_secs(1)).await;
        }
    }

    let client = Arc::new(OandaClient::from_config(&config));
    let mut scheduler = Scheduler::new(config, client);

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, stopping after the current cycle");
                shutdown_signal.store(true, Ordering::SeqCst);
            }
            Err(e) => error!("failed to install signal handler: {e}"),
        }
    });

    scheduler.run(shutdown).await?;
    info!("trading session ended");
    Ok(())
}
