//! Order identity and lifecycle types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::decimal::{Price, Qty};
use crate::symbol::Symbol;

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Returns 1 for buy, -1 for sell.
    pub fn sign(&self) -> i8 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Time-in-force for orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good-til-canceled.
    #[default]
    #[serde(rename = "Gtc")]
    GoodTilCanceled,
    /// Immediate-or-cancel. Venues without native support approximate
    /// it by canceling the unfilled remainder right after submission.
    #[serde(rename = "Ioc")]
    ImmediateOrCancel,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GoodTilCanceled => write!(f, "Gtc"),
            Self::ImmediateOrCancel => write!(f, "Ioc"),
        }
    }
}

/// Normalized order state.
///
/// Venue status strings are mapped onto this machine:
/// `Opened -> {PartiallyFilled ->}* {Filled | Canceled | Rejected}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Accepted by the venue, resting or working.
    Opened,
    /// Some quantity executed, remainder still working.
    PartiallyFilled,
    /// Fully executed. Terminal.
    Filled,
    /// Canceled, possibly after partial execution. Terminal.
    Canceled,
    /// Refused by the venue. Terminal.
    Rejected,
}

impl OrderStatus {
    /// Returns true if the order can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Canceled | Self::Rejected)
    }

    /// Returns true if the order is still working at the venue.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Opened | Self::PartiallyFilled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opened => write!(f, "opened"),
            Self::PartiallyFilled => write!(f, "partially_filled"),
            Self::Filled => write!(f, "filled"),
            Self::Canceled => write!(f, "canceled"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// Client order ID for idempotency.
///
/// Every submission carries a unique id so a retried request can be
/// recognized by the venue as a duplicate instead of a second order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientOrderId(String);

impl ClientOrderId {
    /// Create a new unique client order ID.
    ///
    /// Format: `xc_{timestamp_ms}_{uuid_short}`
    pub fn new() -> Self {
        let ts = Utc::now().timestamp_millis();
        let uuid_short = &Uuid::new_v4().to_string()[..8];
        Self(format!("xc_{ts}_{uuid_short}"))
    }

    /// Wrap an existing id (for parsing venue responses).
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClientOrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one outstanding order at a venue.
///
/// Created when the venue accepts the order; released by the caller
/// once the order reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderTransactionContext {
    /// Venue-assigned order id.
    pub venue_order_id: String,
    /// Client id the order was submitted with.
    pub client_id: ClientOrderId,
    /// Symbol the order trades.
    pub symbol: Symbol,
    /// Venue-specific correlation data (e.g. a numeric product id)
    /// required by cancel or status queries.
    pub correlation: Option<String>,
}

impl fmt::Display for OrderTransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.venue_order_id, self.symbol)
    }
}

/// One execution against an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub price: Price,
    pub qty: Qty,
    /// Fee charged by the venue, in the quote currency.
    pub fee: rust_decimal::Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Normalized order report, produced by both the push and the poll
/// reconciliation paths so downstream code is agnostic to the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub venue_order_id: String,
    pub status: OrderStatus,
    /// Cumulative filled quantity reported by the venue.
    pub filled_qty: Qty,
    /// Average fill price, when the venue reports one.
    pub avg_price: Option<Price>,
    /// Event time, already translated to local clock terms.
    pub timestamp: DateTime<Utc>,
}
