//! Grid trading bot for the OANDA v20 forex API
//!
//! Partitions a configured price range into a ladder of limit orders around
//! the current price, re-arms levels as they fill, and halts on account-level
//! risk breaches. The engine is split into four pieces:
//!
//! - [`planner`]: pure grid arithmetic (levels, spacing, profitability)
//! - [`ledger`]: the per-level order state machine and reconciliation cycle
//! - [`risk`]: halting checks plus the transient spread check
//! - [`scheduler`]: the fixed-interval loop driving one cycle at a time
//!
//! The broker is reached only through the [`gateway`] traits; [`oanda`] is
//! the production implementation with retry, rate limiting, and a circuit
//! breaker.
//!
//! # Example
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//! use std::sync::Arc;
//! use forex_gridbot::{Config, OandaClient, Scheduler};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file("configs/eur_usd.json")?;
//!     let client = Arc::new(OandaClient::from_config(&config));
//!     let mut scheduler = Scheduler::new(config, client);
//!     scheduler.run(Arc::new(AtomicBool::new(false))).await?;
//!     Ok(())
//! }
//! ```

pub mod common;
pub mod config;
pub mod gateway;
pub mod ledger;
pub mod oanda;
pub mod planner;
pub mod risk;
pub mod scheduler;
pub mod types;

pub use config::Config;
pub use oanda::OandaClient;
pub use scheduler::Scheduler;
pub use types::*;
