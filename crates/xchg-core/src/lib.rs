//! Core domain types for the xchg trading engine.
//!
//! This crate provides the fundamental types shared by every venue
//! adapter and the risk layer:
//! - `Price`, `Qty`: precision-safe numeric types
//! - `Currency`, `Symbol`: exchange-agnostic instrument identity
//! - `Product`: venue trading rules (steps, bounds, min notional)
//! - `OrderSide`, `TimeInForce`, `OrderStatus`: trading enums
//! - `OrderTransactionContext`, `ClientOrderId`: order identity
//! - `Quote`: top-of-book record

pub mod decimal;
pub mod error;
pub mod order;
pub mod product;
pub mod quote;
pub mod symbol;

pub use decimal::{Price, Qty};
pub use error::{CoreError, Result};
pub use order::{
    ClientOrderId, Fill, OrderSide, OrderStatus, OrderTransactionContext, OrderUpdate, TimeInForce,
};
pub use product::{BoundViolation, Product};
pub use quote::{Quote, QuoteState};
pub use symbol::{Currency, Symbol};
