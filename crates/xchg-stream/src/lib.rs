//! Streaming connection lifecycle and scheduling.
//!
//! Three building blocks shared by every venue adapter:
//! - `Scheduler`: cancelable, named scopes of delayed callbacks
//! - `StreamConnection`: one persistent push channel (handshake,
//!   subscribe, dispatch loop, disconnect detection) with no
//!   reconnection policy of its own
//! - `PollingTask`: recurring pull jobs with per-job cadence and
//!   on-demand acceleration

pub mod connection;
pub mod error;
pub mod polling;
pub mod scheduler;

pub use connection::{
    ConnectionState, EventSink, StreamConfig, StreamConnection, StreamStopHandle,
};
pub use error::{StreamError, StreamResult};
pub use polling::{PollingConfig, PollingTask};
pub use scheduler::{Scheduler, SchedulerScope};
