//! Top-of-book quote types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::{Price, Qty};

/// Quote validity states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteState {
    /// Both sides present and bid < ask.
    Valid,
    /// No bid side.
    NoBid,
    /// No ask side.
    NoAsk,
    /// Both sides missing.
    Empty,
    /// Crossed book (bid >= ask).
    Crossed,
}

impl QuoteState {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

impl std::fmt::Display for QuoteState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Valid => write!(f, "VALID"),
            Self::NoBid => write!(f, "NO_BID"),
            Self::NoAsk => write!(f, "NO_ASK"),
            Self::Empty => write!(f, "EMPTY"),
            Self::Crossed => write!(f, "CROSSED"),
        }
    }
}

/// Best bid and ask for an instrument at one venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub bid_price: Price,
    pub bid_qty: Qty,
    pub ask_price: Price,
    pub ask_qty: Qty,
    /// When this quote was received.
    pub received_at: DateTime<Utc>,
}

impl Quote {
    pub fn new(bid_price: Price, bid_qty: Qty, ask_price: Price, ask_qty: Qty) -> Self {
        Self {
            bid_price,
            bid_qty,
            ask_price,
            ask_qty,
            received_at: Utc::now(),
        }
    }

    /// Classify the quote.
    pub fn state(&self) -> QuoteState {
        let has_bid = self.bid_price.is_positive() && self.bid_qty.is_positive();
        let has_ask = self.ask_price.is_positive() && self.ask_qty.is_positive();

        match (has_bid, has_ask) {
            (false, false) => QuoteState::Empty,
            (true, false) => QuoteState::NoAsk,
            (false, true) => QuoteState::NoBid,
            (true, true) => {
                if self.bid_price < self.ask_price {
                    QuoteState::Valid
                } else {
                    QuoteState::Crossed
                }
            }
        }
    }

    /// Mid price, only for a valid quote.
    pub fn mid_price(&self) -> Option<Price> {
        if self.state() != QuoteState::Valid {
            return None;
        }
        Some(Price::new(
            (self.bid_price.inner() + self.ask_price.inner()) / rust_decimal::Decimal::TWO,
        ))
    }

    /// Spread: ask - bid.
    pub fn spread(&self) -> Price {
        self.ask_price - self.bid_price
    }

    /// Age of this quote in milliseconds.
    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.received_at).num_milliseconds()
    }
}
