//! Outbound request throttling.
//!
//! Sliding-window budget shared by all requests to one venue, with a
//! slice of the window reserved for order-management traffic so that
//! market-data polling can never starve a cancel.

use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::warn;

/// Request priority class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Order management (submit, cancel, status). May consume the
    /// whole window.
    Order,
    /// Market data and other best-effort traffic. Limited to the
    /// unreserved share of the window.
    MarketData,
}

/// Flood control configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FloodControlConfig {
    /// Maximum requests per window.
    pub max_requests: u32,
    /// Window size in milliseconds.
    pub window_ms: u64,
    /// Window slots reserved for `Priority::Order` traffic.
    pub order_reserve: u32,
}

impl Default for FloodControlConfig {
    fn default() -> Self {
        Self {
            max_requests: 20,
            window_ms: 1_000,
            order_reserve: 5,
        }
    }
}

/// Sliding-window request throttle.
pub struct FloodControl {
    config: FloodControlConfig,
    /// None = disabled, every acquire is a free permit.
    timestamps: Option<Mutex<VecDeque<Instant>>>,
}

/// Proof that the rate budget admitted one request.
#[derive(Debug)]
#[non_exhaustive]
pub struct Permit;

impl FloodControl {
    /// Create a throttle with the given budget.
    pub fn new(config: FloodControlConfig) -> Self {
        let capacity = config.max_requests as usize;
        Self {
            config,
            timestamps: Some(Mutex::new(VecDeque::with_capacity(capacity))),
        }
    }

    /// No-op throttle for venues without documented limits.
    pub fn disabled() -> Self {
        Self {
            config: FloodControlConfig::default(),
            timestamps: None,
        }
    }

    /// Block until the venue budget admits one more request of this
    /// priority class, then consume a slot.
    pub async fn acquire(&self, priority: Priority) -> Permit {
        if self.timestamps.is_none() {
            return Permit;
        }

        let mut warned = false;
        loop {
            if self.try_acquire(priority) {
                return Permit;
            }
            if !warned {
                warn!(?priority, "flood control saturated, waiting for window");
                warned = true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Non-blocking variant: take a slot if one is free.
    pub fn try_acquire(&self, priority: Priority) -> bool {
        let Some(timestamps) = &self.timestamps else {
            return true;
        };

        let mut guard = timestamps.lock();
        Self::evict_expired(&mut guard, self.config.window_ms);

        let used = guard.len() as u32;
        let limit = match priority {
            Priority::Order => self.config.max_requests,
            Priority::MarketData => self
                .config
                .max_requests
                .saturating_sub(self.config.order_reserve),
        };

        if used < limit {
            guard.push_back(Instant::now());
            true
        } else {
            false
        }
    }

    /// Requests currently counted in the window.
    pub fn in_window(&self) -> u32 {
        match &self.timestamps {
            None => 0,
            Some(timestamps) => {
                let mut guard = timestamps.lock();
                Self::evict_expired(&mut guard, self.config.window_ms);
                guard.len() as u32
            }
        }
    }

    fn evict_expired(timestamps: &mut VecDeque<Instant>, window_ms: u64) {
        let window = Duration::from_millis(window_ms);
        let now = Instant::now();
        while timestamps
            .front()
            .is_some_and(|&t| now.duration_since(t) >= window)
        {
            timestamps.pop_front();
        }
    }
}
