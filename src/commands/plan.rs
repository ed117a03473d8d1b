//! Plan command: render the grid report without placing anything.
//!
//! With `--price` the report is computed offline; otherwise a live quote is
//! fetched and its actual spread is used.

use anyhow::{Context, Result};
use tracing::info;

use forex_gridbot::config::Config;
use forex_gridbot::gateway::PriceFeed;
use forex_gridbot::planner::{self, GridReport};
use forex_gridbot::OandaClient;

pub fn run(config_path: String, price: Option<f64>, spread: f64) -> Result<()> {
    dotenv::dotenv().ok();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(run_async(config_path, price, spread))
}

async fn run_async(config_path: String, price: Option<f64>, spread: f64) -> Result<()> {
    let config = Config::from_file(&config_path)
        .with_context(|| format!("failed to load config from {config_path}"))?;

    let (current_price, spread_pips) = match price {
        Some(p) => (p, spread),
        None => {
            info!("fetching live quote for {}", config.trading.instrument);
            let client = OandaClient::from_config(&config);
            let tick = client
                .get_price(&config.trading.instrument)
                .await
                .context("failed to fetch a live quote; pass --price to plan offline")?;
            (tick.mid, tick.spread_pips)
        }
    };

    let report = planner::grid_report(
        &config.trading.instrument,
        config.trading.lower_level,
        config.trading.upper_level,
        config.trading.number_of_grids,
        config.trading.units_per_trade,
        current_price,
        spread_pips,
    )?;

    print_report(&report);
    Ok(())
}

fn print_report(report: &GridReport) {
    println!("\n{}", "=".repeat(60));
    println!("GRID CONFIGURATION - {}", report.instrument);
    println!("{}", "=".repeat(60));
    println!("  Current price:     {:.5}", report.current_price);
    println!(
        "  Range:             {:.5} - {:.5}",
        report.lower_level, report.upper_level
    );
    println!("  Grids:             {}", report.number_of_grids);
    println!("  Spacing:           {:.2} pips", report.spacing_pips);
    println!("  Units per trade:   {}", report.units_per_trade);

    println!("\n  Buy levels  ({}):", report.buy_levels.len());
    for chunk in report.buy_levels.chunks(5) {
        let row: Vec<String> = chunk.iter().map(|p| format!("{p:.5}")).collect();
        println!("    {}", row.join("  "));
    }
    println!("  Sell levels ({}):", report.sell_levels.len());
    for chunk in report.sell_levels.chunks(5) {
        let row: Vec<String> = chunk.iter().map(|p| format!("{p:.5}")).collect();
        println!("    {}", row.join("  "));
    }

    println!("\n{}", "-".repeat(60));
    println!("PROFITABILITY");
    println!("{}", "-".repeat(60));
    println!(
        "  Gross per cycle:   ${:.2}",
        report.gross_profit_per_cycle
    );
    println!(
        "  Spread cost:       ${:.2}",
        report.spread_cost_per_cycle
    );
    println!("  Net per cycle:     ${:.2}", report.net_profit_per_cycle);
    println!("  Daily estimate:    ${:.2}", report.expected_daily_profit);
    println!(
        "  Monthly estimate:  ${:.2} ({:.2}% ROI)",
        report.expected_monthly_profit, report.monthly_roi_percent
    );

    println!("\n{}", "-".repeat(60));
    println!("CAPITAL");
    println!("{}", "-".repeat(60));
    println!(
        "  Required:          ${:.2} ({} simultaneous positions worst case)",
        report.capital.required_capital, report.capital.max_positions
    );
    println!("  Margin buffer:     ${:.2}", report.capital.margin_buffer);
    println!(
        "  Recommended:       ${:.2}",
        report.capital.total_recommended
    );

    if !report.warnings.is_empty() {
        println!("\n{}", "-".repeat(60));
        println!("WARNINGS");
        println!("{}", "-".repeat(60));
        for warning in &report.warnings {
            println!("  ! {warning}");
        }
    }
    println!("{}\n", "=".repeat(60));
}
