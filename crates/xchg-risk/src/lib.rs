//! Pre-trade risk control.
//!
//! A forest of trading scopes (one global scope plus optional
//! per-symbol scopes) authorizes every order before it reaches a
//! venue and accounts for confirmations afterwards. Order-count and
//! exposure limits are enforced per check; PnL and win-ratio limits
//! are periodic checks for a supervisory layer.

pub mod control;
pub mod error;
pub mod scope;

pub use control::{OperationId, RiskControl};
pub use error::{RiskError, RiskResult};
pub use scope::{Scope, ScopeCounters, ScopeLimits};
