//! Venue-specific trading rules for a symbol.
//!
//! A `Product` is loaded once from the venue catalog at connect time and
//! is immutable afterwards; a reconnect replaces the catalog wholesale.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::decimal::{Price, Qty};
use crate::order::OrderSide;
use crate::symbol::Symbol;

/// A single bound violated by an order pre-check.
///
/// Carries the configured bound so callers can report the exact limit
/// that was broken instead of a bare rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundViolation {
    /// Quantity below the venue minimum.
    QtyBelowMin { min: Qty },
    /// Quantity above the venue maximum.
    QtyAboveMax { max: Qty },
    /// Quantity not a multiple of the lot step.
    QtyOffStep { step: Qty },
    /// Price not a multiple of the tick.
    PriceOffTick { tick: Price },
    /// Price must be strictly positive.
    PriceNotPositive,
    /// Quantity must be strictly positive.
    QtyNotPositive,
    /// Order notional below the venue minimum.
    NotionalBelowMin { min: Decimal },
}

impl std::fmt::Display for BoundViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QtyBelowMin { min } => write!(f, "qty below minimum {min}"),
            Self::QtyAboveMax { max } => write!(f, "qty above maximum {max}"),
            Self::QtyOffStep { step } => write!(f, "qty not aligned to step {step}"),
            Self::PriceOffTick { tick } => write!(f, "price not aligned to tick {tick}"),
            Self::PriceNotPositive => write!(f, "price must be positive"),
            Self::QtyNotPositive => write!(f, "qty must be positive"),
            Self::NotionalBelowMin { min } => write!(f, "notional below minimum {min}"),
        }
    }
}

/// Venue trading rules for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// The exchange-agnostic symbol this product describes.
    pub symbol: Symbol,
    /// The venue's wire name for the symbol (e.g. "BTCUSDT", "BTC-USD").
    pub venue_symbol: String,
    /// Minimum order quantity.
    pub min_qty: Qty,
    /// Maximum order quantity.
    pub max_qty: Qty,
    /// Quantity increment.
    pub qty_step: Qty,
    /// Price increment.
    pub tick_size: Price,
    /// Minimum order notional (qty * price) in the quote currency.
    pub min_notional: Decimal,
    /// Whether the venue reports this product as tradable.
    pub is_active: bool,
}

impl Product {
    /// Validate order parameters against this product's bounds.
    ///
    /// Pure pre-check: no rounding is ever applied on the caller's
    /// behalf. The first violated bound is returned, deterministically
    /// for the same input. Check order: positivity, quantity bounds,
    /// grid alignment, notional.
    pub fn validate_order(&self, qty: Qty, price: Price, _side: OrderSide) -> Result<(), BoundViolation> {
        if !price.is_positive() {
            return Err(BoundViolation::PriceNotPositive);
        }
        if !qty.is_positive() {
            return Err(BoundViolation::QtyNotPositive);
        }
        if qty < self.min_qty {
            return Err(BoundViolation::QtyBelowMin { min: self.min_qty });
        }
        if self.max_qty.is_positive() && qty > self.max_qty {
            return Err(BoundViolation::QtyAboveMax { max: self.max_qty });
        }
        if !qty.is_step_aligned(self.qty_step) {
            return Err(BoundViolation::QtyOffStep { step: self.qty_step });
        }
        if !price.is_tick_aligned(self.tick_size) {
            return Err(BoundViolation::PriceOffTick {
                tick: self.tick_size,
            });
        }
        if qty.notional(price) < self.min_notional {
            return Err(BoundViolation::NotionalBelowMin {
                min: self.min_notional,
            });
        }
        Ok(())
    }

    /// Check whether trading rules materially changed between catalog
    /// loads. Used to warn when a reconnect replaces the catalog with
    /// different steps or bounds.
    pub fn has_material_change(&self, other: &Self) -> bool {
        self.min_qty != other.min_qty
            || self.max_qty != other.max_qty
            || self.qty_step != other.qty_step
            || self.tick_size != other.tick_size
            || self.min_notional != other.min_notional
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::Currency;
    use rust_decimal_macros::dec;

    fn product() -> Product {
        Product {
            symbol: Symbol::new(Currency::new("BTC"), Currency::new("USDT")),
            venue_symbol: "BTCUSDT".to_string(),
            min_qty: Qty::new(dec!(0.001)),
            max_qty: Qty::new(dec!(1000)),
            qty_step: Qty::new(dec!(0.001)),
            tick_size: Price::new(dec!(0.01)),
            min_notional: dec!(10),
            is_active: true,
        }
    }

    #[test]
    fn test_qty_below_min_returns_bound() {
        // Undersized orders must be rejected with the configured
        // minimum, never rounded up and accepted.
        let err = product()
            .validate_order(
                Qty::new(dec!(0.0005)),
                Price::new(dec!(50000)),
                OrderSide::Buy,
            )
            .unwrap_err();

        assert_eq!(
            err,
            BoundViolation::QtyBelowMin {
                min: Qty::new(dec!(0.001))
            }
        );
    }

    #[test]
    fn test_rejection_is_deterministic() {
        let p = product();
        let first = p.validate_order(
            Qty::new(dec!(0.0005)),
            Price::new(dec!(50000)),
            OrderSide::Sell,
        );
        let second = p.validate_order(
            Qty::new(dec!(0.0005)),
            Price::new(dec!(50000)),
            OrderSide::Sell,
        );
        assert_eq!(first, second);
    }

    #[test]
    fn test_valid_order_passes() {
        assert!(product()
            .validate_order(
                Qty::new(dec!(0.01)),
                Price::new(dec!(50000)),
                OrderSide::Buy
            )
            .is_ok());
    }

    #[test]
    fn test_qty_off_step() {
        let err = product()
            .validate_order(
                Qty::new(dec!(0.0015)),
                Price::new(dec!(50000)),
                OrderSide::Buy,
            )
            .unwrap_err();
        assert_eq!(
            err,
            BoundViolation::QtyOffStep {
                step: Qty::new(dec!(0.001))
            }
        );
    }

    #[test]
    fn test_price_off_tick() {
        let err = product()
            .validate_order(
                Qty::new(dec!(0.01)),
                Price::new(dec!(50000.005)),
                OrderSide::Buy,
            )
            .unwrap_err();
        assert_eq!(
            err,
            BoundViolation::PriceOffTick {
                tick: Price::new(dec!(0.01))
            }
        );
    }

    #[test]
    fn test_notional_below_min() {
        let err = product()
            .validate_order(Qty::new(dec!(0.001)), Price::new(dec!(100)), OrderSide::Buy)
            .unwrap_err();
        assert_eq!(err, BoundViolation::NotionalBelowMin { min: dec!(10) });
    }

    #[test]
    fn test_material_change() {
        let a = product();
        let mut b = a.clone();
        assert!(!a.has_material_change(&b));

        b.tick_size = Price::new(dec!(0.001));
        assert!(a.has_material_change(&b));
    }
}
