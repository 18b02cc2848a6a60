//! Server/local clock offset tracking.
//!
//! Push events carry venue timestamps; reconciliation compares them
//! with local state, so one offset is measured per venue and applied
//! uniformly to every translated event time.

use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// Tracks the venue-server clock offset against the local clock.
#[derive(Debug, Default)]
pub struct ClockSync {
    /// server_time - local_time, in milliseconds.
    offset_ms: AtomicI64,
}

impl ClockSync {
    pub fn new() -> Self {
        Self {
            offset_ms: AtomicI64::new(0),
        }
    }

    /// Record a server-time measurement against the local receive
    /// time of the same response.
    pub fn update(&self, server_time: DateTime<Utc>, local_time: DateTime<Utc>) {
        let offset = (server_time - local_time).num_milliseconds();
        self.offset_ms.store(offset, Ordering::Relaxed);
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::Relaxed)
    }

    /// Translate a venue timestamp into local clock terms.
    pub fn to_local(&self, server_time: DateTime<Utc>) -> DateTime<Utc> {
        server_time - Duration::milliseconds(self.offset_ms())
    }
}
