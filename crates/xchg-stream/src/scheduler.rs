//! Cancelable timer scheduling.
//!
//! A `SchedulerScope` groups pending delayed callbacks so an adapter
//! can tear down all of its scheduled work (reconnect attempts,
//! polling ticks) with one `cancel()` call. Canceling prevents
//! callbacks that have not started; a callback already executing runs
//! to completion.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Spawns delayed callbacks onto the tokio runtime.
#[derive(Debug, Default, Clone)]
pub struct Scheduler;

impl Scheduler {
    pub fn new() -> Self {
        Self
    }

    /// Create a named scope callbacks can be registered against.
    pub fn scope(&self, name: impl Into<String>) -> SchedulerScope {
        SchedulerScope {
            name: name.into(),
            token: CancellationToken::new(),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Run `callback` after `delay` unless the scope is canceled first.
    pub fn schedule<F>(&self, delay: Duration, scope: &SchedulerScope, callback: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if scope.token.is_cancelled() {
            trace!(scope = %scope.name, "schedule on canceled scope ignored");
            return;
        }

        scope.pending.fetch_add(1, Ordering::SeqCst);
        let token = scope.token.clone();
        let pending = scope.pending.clone();
        let scope_name = scope.name.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {
                    // cancel() reclaimed the pending slot already
                    trace!(scope = %scope_name, "callback canceled before start");
                }
                () = tokio::time::sleep(delay) => {
                    // Claim the slot; losing the claim means cancel()
                    // zeroed the counter first and we must not start.
                    let claimed = pending
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
                        .is_ok();
                    if claimed {
                        callback.await;
                    } else {
                        trace!(scope = %scope_name, "callback lost claim to cancel");
                    }
                }
            }
        });
    }
}

/// A named group of pending callbacks.
///
/// Cloning shares the scope: cancellation through any clone affects
/// every callback registered against it.
#[derive(Debug, Clone)]
pub struct SchedulerScope {
    name: String,
    token: CancellationToken,
    pending: Arc<AtomicUsize>,
}

impl SchedulerScope {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cancel the scope. Returns the number of callbacks that were
    /// scheduled but had not started; none of them will run. A
    /// callback already executing is not interrupted.
    pub fn cancel(&self) -> usize {
        self.token.cancel();
        let prevented = self.pending.swap(0, Ordering::SeqCst);
        debug!(scope = %self.name, prevented, "scope canceled");
        prevented
    }

    pub fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Callbacks scheduled but not yet started.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// A child token for long-running loops that should stop when the
    /// scope is torn down (polling runners, reconnect loops).
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn test_callback_fires_after_delay() {
        let scheduler = Scheduler::new();
        let scope = scheduler.scope("test");
        let fired = Arc::new(AtomicU32::new(0));

        let counter = fired.clone();
        scheduler.schedule(Duration::from_millis(10), &scope, async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scope.pending(), 0);
    }

    #[tokio::test]
    async fn test_cancel_prevents_pending_callbacks() {
        let scheduler = Scheduler::new();
        let scope = scheduler.scope("test");
        let fired = Arc::new(AtomicU32::new(0));

        for _ in 0..5 {
            let counter = fired.clone();
            scheduler.schedule(Duration::from_millis(200), &scope, async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        let prevented = scope.cancel();
        assert_eq!(prevented, 5);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_schedule_after_cancel_never_fires() {
        let scheduler = Scheduler::new();
        let scope = scheduler.scope("test");
        scope.cancel();

        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();
        scheduler.schedule(Duration::from_millis(1), &scope, async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(scope.pending(), 0);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_under_churn() {
        // Rapid schedule/cancel cycles must never leak a callback.
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicU32::new(0));

        for _ in 0..20 {
            let scope = scheduler.scope("churn");
            let counter = fired.clone();
            scheduler.schedule(Duration::from_millis(100), &scope, async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            scope.cancel();
            assert_eq!(scope.cancel(), 0);
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_started_callback_not_interrupted() {
        let scheduler = Scheduler::new();
        let scope = scheduler.scope("test");
        let fired = Arc::new(AtomicU32::new(0));

        let counter = fired.clone();
        scheduler.schedule(Duration::from_millis(5), &scope, async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // Cancel while the callback is mid-flight.
        tokio::time::sleep(Duration::from_millis(25)).await;
        let prevented = scope.cancel();
        assert_eq!(prevented, 0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
