//! Locally held order-book sides.
//!
//! Venues that do not push top-of-book directly send a snapshot
//! followed by incremental add/remove/modify operations. Each side is
//! kept ordered by price so the best level falls out of the map edge:
//! highest price for bids, lowest for asks.

use rust_decimal::Decimal;
use std::collections::BTreeMap;

use xchg_core::{Price, Qty};

/// Which side of the book an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookSideKind {
    Bid,
    Ask,
}

/// Incremental book operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOp {
    /// Insert a level. Replaces quantity if the price exists.
    Add,
    /// Update the quantity at a price. Zero removes the level.
    Modify,
    /// Drop a level.
    Remove,
}

/// One side of an order book, keyed by price.
#[derive(Debug)]
pub struct BookSide {
    kind: BookSideKind,
    levels: BTreeMap<Decimal, Qty>,
}

impl BookSide {
    pub fn bid() -> Self {
        Self {
            kind: BookSideKind::Bid,
            levels: BTreeMap::new(),
        }
    }

    pub fn ask() -> Self {
        Self {
            kind: BookSideKind::Ask,
            levels: BTreeMap::new(),
        }
    }

    /// Best level: highest bid, lowest ask.
    pub fn best(&self) -> Option<(Price, Qty)> {
        let entry = match self.kind {
            BookSideKind::Bid => self.levels.iter().next_back(),
            BookSideKind::Ask => self.levels.iter().next(),
        };
        entry.map(|(price, qty)| (Price::new(*price), *qty))
    }

    pub fn apply(&mut self, op: DeltaOp, price: Price, qty: Qty) {
        match op {
            DeltaOp::Add | DeltaOp::Modify => {
                if qty.is_positive() {
                    self.levels.insert(price.inner(), qty);
                } else {
                    self.levels.remove(&price.inner());
                }
            }
            DeltaOp::Remove => {
                self.levels.remove(&price.inner());
            }
        }
    }

    pub fn replace(&mut self, levels: impl IntoIterator<Item = (Price, Qty)>) {
        self.levels.clear();
        for (price, qty) in levels {
            if qty.is_positive() {
                self.levels.insert(price.inner(), qty);
            }
        }
    }

    pub fn clear(&mut self) {
        self.levels.clear();
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// All prices on this side, unordered use only in assertions.
    pub fn prices(&self) -> Vec<Price> {
        self.levels.keys().map(|p| Price::new(*p)).collect()
    }
}

/// Both sides of one security's book.
#[derive(Debug)]
pub struct OrderBook {
    pub bids: BookSide,
    pub asks: BookSide,
}

impl OrderBook {
    pub fn new() -> Self {
        Self {
            bids: BookSide::bid(),
            asks: BookSide::ask(),
        }
    }

    pub fn apply_snapshot(
        &mut self,
        bids: impl IntoIterator<Item = (Price, Qty)>,
        asks: impl IntoIterator<Item = (Price, Qty)>,
    ) {
        self.bids.replace(bids);
        self.asks.replace(asks);
    }

    pub fn apply_delta(&mut self, side: BookSideKind, op: DeltaOp, price: Price, qty: Qty) {
        match side {
            BookSideKind::Bid => self.bids.apply(op, price, qty),
            BookSideKind::Ask => self.asks.apply(op, price, qty),
        }
    }

    /// Best bid and best ask.
    pub fn top(&self) -> (Option<(Price, Qty)>, Option<(Price, Qty)>) {
        (self.bids.best(), self.asks.best())
    }

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}
