//! OANDA v20 REST client
//!
//! Production implementation of the price feed and order gateway seams.
//! Every call goes through a rate limiter, a circuit breaker, and (for
//! idempotent operations) retry with exponential backoff.

mod client;
mod types;

pub use client::{ClientConfig, OandaClient};
pub use types::*;
