//! Risk scopes.
//!
//! A scope is a named risk boundary with immutable configured limits
//! and mutable counters. Many scopes may watch the same symbol; the
//! global scope watches everything.

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::{RiskError, RiskResult};

/// Configured limits for one scope. Immutable after construction.
///
/// A `None` limit is unenforced.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScopeLimits {
    /// Maximum orders sent through this scope.
    pub max_orders: Option<u32>,
    /// Maximum open exposure (sum of reserved notional, quote terms).
    pub max_exposure: Option<Decimal>,
    /// Realized-PnL floor; breached triggers the periodic PnL check.
    pub min_total_pnl: Option<Decimal>,
    /// Win-ratio floor (0..1); breached triggers the periodic check.
    pub min_win_ratio: Option<Decimal>,
    /// Closed trades required before the win-ratio check applies.
    #[serde(default = "default_min_trades")]
    pub min_trades_for_win_ratio: u32,
}

fn default_min_trades() -> u32 {
    10
}

/// Mutable accounting for one scope.
#[derive(Debug, Clone, Default)]
pub struct ScopeCounters {
    /// Orders authorized through this scope, lifetime.
    pub orders_sent: u32,
    /// Notional reserved by checked-but-unconfirmed plus open orders.
    pub open_exposure: Decimal,
    /// Realized PnL from confirmed trades.
    pub realized_pnl: Decimal,
    pub wins: u32,
    pub losses: u32,
}

/// A named risk boundary.
pub struct Scope {
    name: String,
    limits: ScopeLimits,
    counters: Mutex<ScopeCounters>,
}

impl Scope {
    pub fn new(name: impl Into<String>, limits: ScopeLimits) -> Self {
        Self {
            name: name.into(),
            limits,
            counters: Mutex::new(ScopeCounters::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limits(&self) -> &ScopeLimits {
        &self.limits
    }

    pub fn counters(&self) -> ScopeCounters {
        self.counters.lock().clone()
    }

    /// Check the per-order limits without mutating anything.
    pub fn check(&self, notional: Decimal) -> RiskResult<()> {
        let counters = self.counters.lock();

        if let Some(max_orders) = self.limits.max_orders {
            if counters.orders_sent >= max_orders {
                return Err(RiskError::NumberOfOrdersLimit {
                    scope: self.name.clone(),
                    limit: max_orders,
                });
            }
        }

        if let Some(max_exposure) = self.limits.max_exposure {
            let requested = counters.open_exposure + notional;
            if requested > max_exposure {
                return Err(RiskError::NotEnoughFunds {
                    scope: self.name.clone(),
                    limit: max_exposure,
                    requested,
                });
            }
        }

        Ok(())
    }

    /// Commit a passed check: count the order and reserve its notional.
    pub fn reserve(&self, notional: Decimal) {
        let mut counters = self.counters.lock();
        counters.orders_sent += 1;
        counters.open_exposure += notional;
    }

    /// Release a reservation on confirmation. When the trade closed
    /// with a known result, realized PnL and the win/loss tally move.
    pub fn settle(&self, notional: Decimal, realized_pnl: Option<Decimal>) {
        let mut counters = self.counters.lock();
        counters.open_exposure -= notional;
        if let Some(pnl) = realized_pnl {
            counters.realized_pnl += pnl;
            if pnl.is_sign_negative() {
                counters.losses += 1;
            } else {
                counters.wins += 1;
            }
        }
    }

    /// Closed-trade win ratio, once enough trades exist.
    pub fn win_ratio(&self) -> Option<Decimal> {
        let counters = self.counters.lock();
        let total = counters.wins + counters.losses;
        if total < self.limits.min_trades_for_win_ratio || total == 0 {
            return None;
        }
        Some(Decimal::from(counters.wins) / Decimal::from(total))
    }

    /// Periodic PnL floor check.
    pub fn check_pnl(&self) -> RiskResult<Decimal> {
        let pnl = self.counters.lock().realized_pnl;
        if let Some(floor) = self.limits.min_total_pnl {
            if pnl < floor {
                return Err(RiskError::PnlOutOfRange {
                    scope: self.name.clone(),
                    pnl,
                    floor,
                });
            }
        }
        Ok(pnl)
    }

    /// Periodic win-ratio floor check. Passes until the minimum trade
    /// count is reached.
    pub fn check_win_ratio(&self) -> RiskResult<Option<Decimal>> {
        let ratio = match self.win_ratio() {
            Some(r) => r,
            None => return Ok(None),
        };
        if let Some(floor) = self.limits.min_win_ratio {
            if ratio < floor {
                return Err(RiskError::WinRatioOutOfRange {
                    scope: self.name.clone(),
                    ratio,
                    floor,
                });
            }
        }
        Ok(Some(ratio))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_count_limit() {
        let scope = Scope::new(
            "test",
            ScopeLimits {
                max_orders: Some(2),
                ..Default::default()
            },
        );

        assert!(scope.check(dec!(100)).is_ok());
        scope.reserve(dec!(100));
        assert!(scope.check(dec!(100)).is_ok());
        scope.reserve(dec!(100));

        assert!(matches!(
            scope.check(dec!(100)),
            Err(RiskError::NumberOfOrdersLimit { limit: 2, .. })
        ));
    }

    #[test]
    fn test_exposure_limit() {
        let scope = Scope::new(
            "test",
            ScopeLimits {
                max_exposure: Some(dec!(1000)),
                ..Default::default()
            },
        );

        scope.reserve(dec!(800));
        assert!(scope.check(dec!(200)).is_ok());
        assert!(matches!(
            scope.check(dec!(201)),
            Err(RiskError::NotEnoughFunds { .. })
        ));
    }

    #[test]
    fn test_settle_releases_exposure() {
        let scope = Scope::new(
            "test",
            ScopeLimits {
                max_exposure: Some(dec!(1000)),
                ..Default::default()
            },
        );

        scope.reserve(dec!(1000));
        assert!(scope.check(dec!(1)).is_err());

        scope.settle(dec!(1000), None);
        assert!(scope.check(dec!(1000)).is_ok());
    }

    #[test]
    fn test_win_ratio_needs_minimum_trades() {
        let scope = Scope::new(
            "test",
            ScopeLimits {
                min_win_ratio: Some(dec!(0.5)),
                min_trades_for_win_ratio: 3,
                ..Default::default()
            },
        );

        scope.reserve(dec!(10));
        scope.settle(dec!(10), Some(dec!(-5)));
        scope.reserve(dec!(10));
        scope.settle(dec!(10), Some(dec!(-5)));

        // Two losses, below the minimum trade count: check passes.
        assert_eq!(scope.check_win_ratio().unwrap(), None);

        scope.reserve(dec!(10));
        scope.settle(dec!(10), Some(dec!(-5)));

        // Third closed trade, ratio 0 < 0.5: breach.
        assert!(matches!(
            scope.check_win_ratio(),
            Err(RiskError::WinRatioOutOfRange { .. })
        ));
    }

    #[test]
    fn test_pnl_floor() {
        let scope = Scope::new(
            "test",
            ScopeLimits {
                min_total_pnl: Some(dec!(-100)),
                ..Default::default()
            },
        );

        scope.reserve(dec!(10));
        scope.settle(dec!(10), Some(dec!(-50)));
        assert_eq!(scope.check_pnl().unwrap(), dec!(-50));

        scope.reserve(dec!(10));
        scope.settle(dec!(10), Some(dec!(-60)));
        assert!(matches!(
            scope.check_pnl(),
            Err(RiskError::PnlOutOfRange { .. })
        ));
    }
}
