//! REST layer error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RestError {
    /// Handshake-level failure (DNS, TLS, refused connection).
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Mid-session I/O failure or retries exhausted.
    #[error("Communication error: {0}")]
    Communication(String),

    /// The account lacks funds for the operation.
    #[error("Insufficient funds")]
    InsufficientFunds,

    /// The venue does not know the referenced order.
    #[error("Order unknown to venue")]
    OrderUnknown,

    /// Request signing failed (malformed key material).
    #[error("Signature error: {0}")]
    Signature(String),

    /// The request could not be built.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

pub type RestResult<T> = Result<T, RestError>;
