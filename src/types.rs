//! Core data types used across the grid trading system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pip size for 4-decimal FX pairs (EUR_USD and friends).
pub const PIP: f64 = 0.0001;

/// Price precision for FX quotes: pips plus one fractional digit.
pub const PRICE_DECIMALS: u32 = 5;

/// Round a price to the instrument's quote precision.
pub fn round_price(price: f64) -> f64 {
    let factor = 10f64.powi(PRICE_DECIMALS as i32);
    (price * factor).round() / factor
}

/// Convert an absolute price difference to pips.
pub fn to_pips(price_delta: f64) -> f64 {
    price_delta / PIP
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// One target price in the ladder, fixed for the cycle that computed it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridLevel {
    /// Quote rounded to [`PRICE_DECIMALS`].
    pub price: f64,
    /// Buy below the price used at computation time, Sell above it.
    pub side: Side,
    /// 0-based rank from lowest to highest price.
    pub index: usize,
}

/// Lifecycle of the order owned by one grid slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotState {
    /// No resting order, eligible for targeting.
    Empty,
    /// Entry order resting on the book.
    PendingOrder,
    /// Entry order executed; waiting for its opposing leg to be confirmed.
    Filled,
    /// Parked: no new entry orders until an operator clears it.
    Cooldown,
}

impl std::fmt::Display for SlotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SlotState::Empty => "empty",
            SlotState::PendingOrder => "pending",
            SlotState::Filled => "filled",
            SlotState::Cooldown => "cooldown",
        };
        write!(f, "{}", s)
    }
}

/// Persistent tracking record for one grid level's order lifecycle.
///
/// Invariant: at most one open order per slot; `order_id` is present only in
/// `PendingOrder` and `Filled`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridSlot {
    pub level: GridLevel,
    pub state: SlotState,
    pub order_id: Option<String>,
    pub opened_at: Option<DateTime<Utc>>,
    pub filled_at: Option<DateTime<Utc>>,
}

impl GridSlot {
    pub fn new(level: GridLevel) -> Self {
        Self {
            level,
            state: SlotState::Empty,
            order_id: None,
            opened_at: None,
            filled_at: None,
        }
    }
}

/// Point-in-time bid/ask reading from the price feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTick {
    pub bid: f64,
    pub ask: f64,
    pub mid: f64,
    pub spread_pips: f64,
    pub timestamp: DateTime<Utc>,
}

impl PriceTick {
    pub fn from_quotes(bid: f64, ask: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            bid,
            ask,
            mid: (bid + ask) / 2.0,
            spread_pips: to_pips(ask - bid),
            timestamp,
        }
    }
}

/// Point-in-time account read, fetched fresh each cycle and never cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub balance: f64,
    /// Net asset value: balance plus unrealized P&L.
    pub equity: f64,
    pub unrealized_pnl: f64,
    pub margin_used: f64,
    pub open_position_count: usize,
}

impl AccountSnapshot {
    /// Fraction of equity consumed by margin; 0 when equity is non-positive.
    pub fn margin_usage(&self) -> f64 {
        if self.equity > 0.0 {
            self.margin_used / self.equity
        } else {
            0.0
        }
    }
}

/// Request to rest a GTC limit order on the book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub instrument: String,
    pub side: Side,
    pub price: f64,
    pub units: u32,
}

impl OrderRequest {
    pub fn limit(instrument: impl Into<String>, side: Side, price: f64, units: u32) -> Self {
        Self {
            instrument: instrument.into(),
            side,
            price: round_price(price),
            units,
        }
    }

    /// Signed units as the broker expects them: negative for sells.
    pub fn signed_units(&self) -> i64 {
        match self.side {
            Side::Buy => self.units as i64,
            Side::Sell => -(self.units as i64),
        }
    }
}

/// A resting order as reported by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: String,
    pub instrument: String,
    pub side: Side,
    pub price: f64,
    pub units: u32,
    pub state: OrderState,
}

/// Broker-reported order state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    Pending,
    Filled,
    Cancelled,
}

/// An open position as reported by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPosition {
    pub position_id: String,
    pub instrument: String,
    pub side: Side,
    pub units: i64,
    pub unrealized_pnl: f64,
}
