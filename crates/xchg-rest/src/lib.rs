//! Authenticated REST session layer.
//!
//! Everything a venue adapter needs to talk to an exchange REST API:
//! - `Signer`: HMAC request signing (venue plugins pick algorithm/encoding)
//! - `ErrorClassifier`: vendor error payload -> typed outcome
//! - `FloodControl`: outbound request throttling with priority classes
//! - `SessionClient`: signed requests over a reusable connection with
//!   bounded retry and backoff

pub mod classifier;
pub mod error;
pub mod flood;
pub mod session;
pub mod signer;

pub use classifier::{ErrorClassifier, Outcome, StatusClassifier};
pub use error::{RestError, RestResult};
pub use flood::{FloodControl, FloodControlConfig, Priority};
pub use session::{
    AuthProvider, QueryStringAuth, RestMethod, RestRequest, RestResponse, SessionClient,
    SessionConfig,
};
pub use signer::{Credentials, HmacSha256Signer, HmacSha512Signer, SignatureEncoding, Signer};
