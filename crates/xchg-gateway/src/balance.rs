//! Account balance cache.
//!
//! Updated by the order gateway from every balance-bearing event:
//! push updates and polled account snapshots both land here,
//! last-write-wins by arrival order. When push and poll race, the
//! later arrival overwrites regardless of which event the venue
//! produced first; that ordering dependence is accepted behavior.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;

use xchg_core::Currency;

/// (available, locked) amounts for one currency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Balance {
    pub available: Decimal,
    pub locked: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    pub fn total(&self) -> Decimal {
        self.available + self.locked
    }
}

/// Concurrency-safe currency -> balance map.
///
/// Safe for concurrent readers with one writer per adapter instance;
/// the adapter serializes its own update sources.
#[derive(Debug, Default)]
pub struct BalanceCache {
    balances: DashMap<Currency, Balance>,
}

impl BalanceCache {
    pub fn new() -> Self {
        Self {
            balances: DashMap::new(),
        }
    }

    /// Overwrite the record for a currency.
    pub fn set(&self, currency: Currency, available: Decimal, locked: Decimal) {
        self.balances.insert(
            currency,
            Balance {
                available,
                locked,
                updated_at: Utc::now(),
            },
        );
    }

    pub fn get(&self, currency: &Currency) -> Option<Balance> {
        self.balances.get(currency).map(|entry| entry.clone())
    }

    /// All currently known balances.
    pub fn snapshot(&self) -> Vec<(Currency, Balance)> {
        self.balances
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn clear(&self) {
        self.balances.clear();
    }
}
