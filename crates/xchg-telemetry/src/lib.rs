//! Telemetry for the xchg trading engine.
//!
//! Logging is a write-only side channel: every retry, reconnect and
//! rejection is reported through `tracing` and must never block or
//! fail the trading path.

pub mod error;
pub mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
