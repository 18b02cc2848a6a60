//! Risk error types.
//!
//! These are business rejections surfaced to the caller or to a
//! supervisory layer; none of them is retried automatically.

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RiskError {
    #[error("Order count limit reached in scope {scope}: {limit}")]
    NumberOfOrdersLimit { scope: String, limit: u32 },

    #[error("Not enough funds in scope {scope}: exposure {requested} exceeds {limit}")]
    NotEnoughFunds {
        scope: String,
        limit: Decimal,
        requested: Decimal,
    },

    #[error("Wrong order parameter: {0}")]
    WrongOrderParameter(String),

    #[error("PnL out of range in scope {scope}: {pnl} below floor {floor}")]
    PnlOutOfRange {
        scope: String,
        pnl: Decimal,
        floor: Decimal,
    },

    #[error("Win ratio out of range in scope {scope}: {ratio} below floor {floor}")]
    WinRatioOutOfRange {
        scope: String,
        ratio: Decimal,
        floor: Decimal,
    },
}

pub type RiskResult<T> = Result<T, RiskError>;
