//! Serde wire types for the OANDA v20 REST API
//!
//! v20 encodes every decimal as a JSON string. These types decode the
//! strings once at the edge so the rest of the crate only ever sees
//! numeric fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{
    round_price, AccountSnapshot, OpenOrder, OpenPosition, OrderRequest, OrderState, PriceTick,
    Side,
};

fn f64_from_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

fn opt_f64_from_string<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

/// `GET /v3/accounts/{id}/summary`
#[derive(Debug, Deserialize)]
pub struct AccountSummaryResponse {
    pub account: AccountSummary,
}

#[derive(Debug, Deserialize)]
pub struct AccountSummary {
    pub id: String,
    #[serde(deserialize_with = "f64_from_string")]
    pub balance: f64,
    /// Net asset value: balance plus unrealized P&L.
    #[serde(rename = "NAV", deserialize_with = "f64_from_string")]
    pub nav: f64,
    #[serde(rename = "unrealizedPL", deserialize_with = "f64_from_string")]
    pub unrealized_pl: f64,
    #[serde(rename = "marginUsed", deserialize_with = "f64_from_string")]
    pub margin_used: f64,
    #[serde(rename = "openPositionCount")]
    pub open_position_count: usize,
}

impl AccountSummary {
    pub fn to_snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            balance: self.balance,
            equity: self.nav,
            unrealized_pnl: self.unrealized_pl,
            margin_used: self.margin_used,
            open_position_count: self.open_position_count,
        }
    }
}

/// `GET /v3/accounts/{id}/pricing`
#[derive(Debug, Deserialize)]
pub struct PricingResponse {
    pub prices: Vec<ClientPrice>,
}

#[derive(Debug, Deserialize)]
pub struct ClientPrice {
    pub time: DateTime<Utc>,
    pub bids: Vec<PriceBucket>,
    pub asks: Vec<PriceBucket>,
}

#[derive(Debug, Deserialize)]
pub struct PriceBucket {
    #[serde(deserialize_with = "f64_from_string")]
    pub price: f64,
}

impl ClientPrice {
    /// Best bid and ask collapsed into one tick; `None` when either side of
    /// the book came back empty (halted instrument, weekend).
    pub fn to_tick(&self) -> Option<PriceTick> {
        let bid = self.bids.first()?.price;
        let ask = self.asks.first()?.price;
        Some(PriceTick::from_quotes(bid, ask, self.time))
    }
}

/// `GET /v3/accounts/{id}/orders`
#[derive(Debug, Deserialize)]
pub struct OrdersResponse {
    pub orders: Vec<OrderDetails>,
}

#[derive(Debug, Deserialize)]
pub struct OrderDetails {
    pub id: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub state: String,
    #[serde(default)]
    pub instrument: Option<String>,
    #[serde(default, deserialize_with = "opt_f64_from_string")]
    pub price: Option<f64>,
    #[serde(default, deserialize_with = "opt_f64_from_string")]
    pub units: Option<f64>,
}

impl OrderDetails {
    /// Limit orders map onto the gateway's resting-order shape. Anything
    /// else the account holds (market orders, stop-loss children) is not
    /// part of the ladder and is skipped.
    pub fn to_open_order(&self) -> Option<OpenOrder> {
        if self.order_type != "LIMIT" {
            return None;
        }
        let units = self.units?;
        let state = match self.state.as_str() {
            "PENDING" | "TRIGGERED" => OrderState::Pending,
            "FILLED" => OrderState::Filled,
            "CANCELLED" => OrderState::Cancelled,
            _ => return None,
        };
        Some(OpenOrder {
            order_id: self.id.clone(),
            instrument: self.instrument.clone()?,
            side: if units < 0.0 { Side::Sell } else { Side::Buy },
            price: round_price(self.price?),
            units: units.abs() as u32,
            state,
        })
    }
}

/// `POST /v3/accounts/{id}/orders` request body.
#[derive(Debug, Clone, Serialize)]
pub struct CreateOrderBody {
    pub order: LimitOrderSpec,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitOrderSpec {
    #[serde(rename = "type")]
    pub order_type: String,
    pub instrument: String,
    /// Signed unit string: negative sells, positive buys.
    pub units: String,
    pub price: String,
    pub time_in_force: String,
}

impl CreateOrderBody {
    /// GTC limit order at the request's price.
    pub fn limit_gtc(request: &OrderRequest) -> Self {
        Self {
            order: LimitOrderSpec {
                order_type: "LIMIT".to_string(),
                instrument: request.instrument.clone(),
                units: request.signed_units().to_string(),
                price: format!("{:.5}", request.price),
                time_in_force: "GTC".to_string(),
            },
        }
    }
}

/// `POST /v3/accounts/{id}/orders` response. A marketable limit order fills
/// immediately and comes back as a fill transaction instead of a create.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderResponse {
    #[serde(default)]
    pub order_create_transaction: Option<Transaction>,
    #[serde(default)]
    pub order_fill_transaction: Option<Transaction>,
}

#[derive(Debug, Deserialize)]
pub struct Transaction {
    pub id: String,
}

impl CreateOrderResponse {
    /// Broker id of the order this request created.
    pub fn order_id(&self) -> Option<String> {
        self.order_create_transaction
            .as_ref()
            .or(self.order_fill_transaction.as_ref())
            .map(|t| t.id.clone())
    }
}

/// `GET /v3/accounts/{id}/openPositions`
#[derive(Debug, Deserialize)]
pub struct OpenPositionsResponse {
    pub positions: Vec<InstrumentPosition>,
}

/// v20 reports one record per instrument with separate long and short legs.
#[derive(Debug, Deserialize)]
pub struct InstrumentPosition {
    pub instrument: String,
    #[serde(rename = "unrealizedPL", deserialize_with = "f64_from_string")]
    pub unrealized_pl: f64,
    pub long: PositionLeg,
    pub short: PositionLeg,
}

#[derive(Debug, Deserialize)]
pub struct PositionLeg {
    #[serde(deserialize_with = "f64_from_string")]
    pub units: f64,
    #[serde(rename = "unrealizedPL", default, deserialize_with = "opt_f64_from_string")]
    pub unrealized_pl: Option<f64>,
}

impl InstrumentPosition {
    /// Non-empty legs as gateway positions, one per direction.
    pub fn to_open_positions(&self) -> Vec<OpenPosition> {
        let mut out = Vec::new();
        if self.long.units != 0.0 {
            out.push(OpenPosition {
                position_id: format!("{}-long", self.instrument),
                instrument: self.instrument.clone(),
                side: Side::Buy,
                units: self.long.units as i64,
                unrealized_pnl: self.long.unrealized_pl.unwrap_or(0.0),
            });
        }
        if self.short.units != 0.0 {
            out.push(OpenPosition {
                position_id: format!("{}-short", self.instrument),
                instrument: self.instrument.clone(),
                side: Side::Sell,
                units: self.short.units as i64,
                unrealized_pnl: self.short.unrealized_pl.unwrap_or(0.0),
            });
        }
        out
    }
}
