//! Live market-data records.
//!
//! One `Security` per subscribed symbol per venue. The bid/ask/online
//! triple is written as a single unit under one lock so readers never
//! observe a half-updated book. Only the owning market-data gateway's
//! update path mutates a security; strategies and risk read snapshots.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

use xchg_core::{Price, Qty, Symbol};

/// Atomic view of one security's top of book.
#[derive(Debug, Clone)]
pub struct SecurityState {
    pub bid: Option<(Price, Qty)>,
    pub ask: Option<(Price, Qty)>,
    /// True only while both sides hold a fresh, non-empty value.
    pub online: bool,
    pub last_update: DateTime<Utc>,
}

impl SecurityState {
    fn offline() -> Self {
        Self {
            bid: None,
            ask: None,
            online: false,
            last_update: Utc::now(),
        }
    }
}

/// Live market-data record for one symbol at one venue.
#[derive(Debug)]
pub struct Security {
    symbol: Symbol,
    state: RwLock<SecurityState>,
}

impl Security {
    pub(crate) fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            state: RwLock::new(SecurityState::offline()),
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Consistent snapshot of bid/ask/online.
    pub fn snapshot(&self) -> SecurityState {
        self.state.read().clone()
    }

    pub fn is_online(&self) -> bool {
        self.state.read().online
    }

    pub fn best_bid(&self) -> Option<(Price, Qty)> {
        self.state.read().bid
    }

    pub fn best_ask(&self) -> Option<(Price, Qty)> {
        self.state.read().ask
    }

    /// Publish a new top of book. Online follows from both sides
    /// being populated; the triple changes in one write.
    pub(crate) fn publish(&self, bid: Option<(Price, Qty)>, ask: Option<(Price, Qty)>) {
        let mut state = self.state.write();
        state.online = bid.is_some() && ask.is_some();
        state.bid = bid;
        state.ask = ask;
        state.last_update = Utc::now();
    }

    /// Drop both sides, e.g. on disconnect.
    pub(crate) fn mark_offline(&self) {
        *self.state.write() = SecurityState::offline();
    }
}

/// All securities created by one adapter.
#[derive(Debug, Default)]
pub struct SecurityStore {
    securities: DashMap<Symbol, Arc<Security>>,
}

impl SecurityStore {
    pub fn new() -> Self {
        Self {
            securities: DashMap::new(),
        }
    }

    pub(crate) fn get_or_create(&self, symbol: &Symbol) -> Arc<Security> {
        self.securities
            .entry(symbol.clone())
            .or_insert_with(|| Arc::new(Security::new(symbol.clone())))
            .clone()
    }

    pub fn get(&self, symbol: &Symbol) -> Option<Arc<Security>> {
        self.securities.get(symbol).map(|entry| entry.clone())
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.securities
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub(crate) fn mark_all_offline(&self) {
        for entry in self.securities.iter() {
            entry.value().mark_offline();
        }
    }
}
