//! Vendor error classification.
//!
//! Each venue returns failures in its own shape (HTTP status plus a
//! vendor code/message body). The classifier maps that to a typed
//! outcome the session client can act on; everything it does not
//! recognize becomes `Fatal` with the raw body preserved for logging.

/// Typed outcome of classifying a venue response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Success, body is usable.
    Ok,
    /// The account lacks funds for the operation. Never retried.
    InsufficientFunds,
    /// The venue does not know the referenced order. Never retried;
    /// cancel paths treat this as a no-op.
    OrderUnknown,
    /// The venue is throttling us. Retried with backoff.
    RateLimited,
    /// A failure worth retrying (gateway hiccup, busy server).
    Transient,
    /// Unrecognized failure. The raw message is preserved for the log.
    Fatal(String),
}

impl Outcome {
    /// Whether the session client may retry this outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Transient)
    }
}

/// Maps a venue response to a typed outcome.
///
/// `attempt` is 1-based; classifiers can special-case first-attempt
/// situations such as duplicate-submission detection (a "duplicate
/// order" vendor code on attempt 1 is an error, on a retry it means
/// the original submission went through).
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, status: u16, body: &str, attempt: u32) -> Outcome;
}

/// Status-only classifier.
///
/// The fallback for venues without a vendor error table: 2xx is Ok,
/// 408/429 rate-limited, 5xx transient, anything else fatal with the
/// body carried along.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusClassifier;

impl ErrorClassifier for StatusClassifier {
    fn classify(&self, status: u16, body: &str, _attempt: u32) -> Outcome {
        match status {
            200..=299 => Outcome::Ok,
            408 | 429 => Outcome::RateLimited,
            500..=599 => Outcome::Transient,
            _ => Outcome::Fatal(body.to_string()),
        }
    }
}
