//! Status command: one-shot read of the account, book, and risk checks.

use anyhow::{Context, Result};

use forex_gridbot::config::Config;
use forex_gridbot::gateway::{OrderGateway, PriceFeed};
use forex_gridbot::risk::RiskController;
use forex_gridbot::OandaClient;

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
    let instrument = config.trading.instrument.clone();
    let client = OandaClient::from_config(&config);

    let snapshot = client
        .get_account_snapshot()
        .await
        .context("failed to fetch account snapshot")?;

    println!("\n{}", "=".repeat(60));
    println!("ACCOUNT - {} ({})", instrument, config.account.environment);
    println!("{}", "=".repeat(60));
    println!("  Balance:         {:.2}", snapshot.balance);
    println!("  Equity (NAV):    {:.2}", snapshot.equity);
    println!("  Unrealized P&L:  {:+.2}", snapshot.unrealized_pnl);
    println!(
        "  Margin used:     {:.2} ({:.1}% of equity)",
        snapshot.margin_used,
        snapshot.margin_usage() * 100.0
    );
    println!("  Open positions:  {}", snapshot.open_position_count);

    let tick = match client.get_price(&instrument).await {
        Ok(tick) => {
            println!("\n  {} bid {:.5} / ask {:.5} ({:.1} pips)", instrument, tick.bid, tick.ask, tick.spread_pips);
            Some(tick)
        }
        Err(e) => {
            println!("\n  no quote: {e}");
            None
        }
    };

    let orders = client
        .list_open_orders(&instrument)
        .await
        .context("failed to list open orders")?;
    println!("\n{}", "-".repeat(60));
    println!("RESTING ORDERS ({})", orders.len());
    println!("{}", "-".repeat(60));
    for order in &orders {
        println!(
            "  #{:<12} {:<4} {:>9.5} x {}",
            order.order_id, order.side, order.price, order.units
        );
    }

    let positions = client
        .list_open_positions(&instrument)
        .await
        .context("failed to list open positions")?;
    println!("\n{}", "-".repeat(60));
    println!("OPEN POSITIONS ({})", positions.len());
    println!("{}", "-".repeat(60));
    for position in &positions {
        println!(
            "  {:<16} {:<4} {:>8} units  P&L {:+.2}",
            position.position_id, position.side, position.units, position.unrealized_pnl
        );
    }

    // Dry risk evaluation against the fresh snapshot: what the controller
    // would decide if a bot cycle ran right now.
    let controller = RiskController::new(config.risk.clone());
    println!("\n{}", "-".repeat(60));
    println!("RISK CHECKS");
    println!("{}", "-".repeat(60));
    match controller.check_max_loss(&snapshot) {
        Ok(()) => println!("  max loss:        pass"),
        Err(breach) => println!("  max loss:        FAIL - {breach}"),
    }
    match controller.check_position_count(snapshot.open_position_count) {
        Ok(()) => println!("  position count:  pass"),
        Err(breach) => println!("  position count:  FAIL - {breach}"),
    }
    match controller.check_margin(&snapshot) {
        Ok(()) => println!("  margin:          pass"),
        Err(breach) => println!("  margin:          FAIL - {breach}"),
    }
    if let Some(tick) = &tick {
        match controller.check_spread(tick) {
            Ok(()) => println!("  spread:          pass"),
            Err(wide) => println!("  spread:          WIDE - {wide}"),
        }
    }
    println!("{}\n", "=".repeat(60));

    Ok(())
}
