//! Forex grid bot - main entry point
//!
//! This binary provides three subcommands:
//! - run: preflight checks and the grid trading loop
//! - plan: grid levels, profitability, and capital report (no orders placed)
//! - status: one-shot account, order book, and risk-check readout

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "forex-gridbot")]
#[command(about = "Grid trading bot for the OANDA v20 forex API", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the grid trading loop
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/eur_usd.json")]
        config: String,
    },

    /// Print the grid plan and profitability report without trading
    Plan {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/eur_usd.json")]
        config: String,

        /// Compute the report at this price instead of fetching a quote
        #[arg(long)]
        price: Option<f64>,

        /// Spread in pips to assume when planning offline
        #[arg(long, default_value = "1.0")]
        spread: f64,
    },

    /// Show account snapshot, resting orders, positions, and risk checks
    Status {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/eur_usd.json")]
        config: String,
    },
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    // Filter out noisy HTTP internals unless RUST_LOG overrides.
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("logging initialized, file: {}", log_path.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Run { .. } => "run",
        Commands::Plan { .. } => "plan",
        Commands::Status { .. } => "status",
    };

    setup_logging(cli.verbose, command_name)?;

    match cli.command {
        Commands::Run { config } => commands::run::run(config),
        Commands::Plan {
            config,
            price,
            spread,
        } => commands::plan::run(config, price, spread),
        Commands::Status { config } => commands::status::run(config),
    }
}
