//! Gateway error types.
//!
//! Business rejections (`SymbolNotSupported`, `UnsupportedOrderType`,
//! `WrongOrderParameter`, `InsufficientFunds`, `OrderUnknown`) always
//! surface to the caller untouched; connection and communication
//! failures follow the adapter's retry policy instead.

use thiserror::Error;
use xchg_core::BoundViolation;
use xchg_rest::RestError;
use xchg_stream::StreamError;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The venue catalog has no product for the requested symbol.
    #[error("Symbol not supported by venue: {0}")]
    SymbolNotSupported(String),

    /// The venue cannot express the requested time-in-force.
    #[error("Unsupported order type: {0}")]
    UnsupportedOrderType(String),

    /// Pre-check rejected the order; the violated bound is carried.
    #[error("Wrong order parameter: {0}")]
    WrongOrderParameter(BoundViolation),

    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Order unknown to venue")]
    OrderUnknown,

    /// Adapter used before `connect` succeeded, or venue outage.
    #[error("Not connected")]
    NotConnected,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Communication error: {0}")]
    Communication(String),

    /// Venue payload did not decode.
    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<RestError> for GatewayError {
    fn from(err: RestError) -> Self {
        match err {
            RestError::InsufficientFunds => Self::InsufficientFunds,
            RestError::OrderUnknown => Self::OrderUnknown,
            RestError::Connection(msg) => Self::Connection(msg),
            RestError::Communication(msg) => Self::Communication(msg),
            RestError::Signature(msg) | RestError::InvalidRequest(msg) => Self::Communication(msg),
        }
    }
}

impl From<StreamError> for GatewayError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::ConnectionFailed(msg) => Self::Connection(msg),
            other => Self::Communication(other.to_string()),
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
