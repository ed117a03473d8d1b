//! Narrow interfaces to the broker
//!
//! The grid engine talks to the outside world exclusively through these two
//! traits. The production implementation is [`crate::oanda::OandaClient`];
//! tests substitute an in-memory mock. Ledger state is an advisory cache:
//! the gateway's open-order and open-position listings are the ground truth
//! the ledger re-syncs against every cycle.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{AccountSnapshot, OpenOrder, OpenPosition, OrderRequest, PriceTick};

/// The price feed could not produce a usable quote this cycle.
#[derive(Debug, Error)]
#[error("price feed unavailable: {reason}")]
pub struct FeedUnavailable {
    pub reason: String,
}

impl FeedUnavailable {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Broker call failures.
///
/// Auth failures are fatal; everything else is retryable on the next cycle
/// with the affected slot state left untouched.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("broker API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to parse broker response: {0}")]
    Parse(String),

    #[error("request rejected: circuit breaker is open")]
    CircuitOpen,
}

impl GatewayError {
    /// Auth rejections cannot be retried into success.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GatewayError::Api { code: 401 | 403, .. })
    }
}

/// Supplies the current market quote for one instrument.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn get_price(&self, instrument: &str) -> Result<PriceTick, FeedUnavailable>;
}

/// Places, cancels, and queries orders and positions at the broker.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Rest a GTC limit order; returns the broker-assigned order id.
    async fn place_order(&self, request: &OrderRequest) -> Result<String, GatewayError>;

    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError>;

    /// Orders currently resting on the book for the instrument.
    async fn list_open_orders(&self, instrument: &str) -> Result<Vec<OpenOrder>, GatewayError>;

    /// Positions currently open for the instrument.
    async fn list_open_positions(
        &self,
        instrument: &str,
    ) -> Result<Vec<OpenPosition>, GatewayError>;

    async fn get_account_snapshot(&self) -> Result<AccountSnapshot, GatewayError>;
}
