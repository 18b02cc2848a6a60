//! Recurring pull-based jobs.
//!
//! Used where a venue offers no push channel, or to supplement one
//! (open-order reconciliation, balance snapshots). Each named job has
//! its own cadence; `accelerate_next_polling` pulls every job's next
//! run forward, typically right after an order submission so status is
//! reconciled without waiting a full period.

use parking_lot::Mutex;
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::scheduler::SchedulerScope;

type JobError = Box<dyn std::error::Error + Send + Sync>;
type JobFuture = Pin<Box<dyn Future<Output = Result<bool, JobError>> + Send>>;
type JobBody = Box<dyn Fn() -> JobFuture + Send + Sync>;

/// Polling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    /// Delay applied to every job by `accelerate_next_polling`.
    pub accelerate_delay_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            accelerate_delay_ms: 50,
        }
    }
}

struct PollJob {
    name: String,
    /// Lower runs first when several jobs are due in the same tick.
    priority: u32,
    frequency: Duration,
    body: JobBody,
    next_run: Mutex<Instant>,
}

/// Recurring job runner.
///
/// The runner is an explicit loop tied to a `SchedulerScope`; canceling
/// the scope stops the loop before any further job starts.
pub struct PollingTask {
    config: PollingConfig,
    jobs: Mutex<Vec<Arc<PollJob>>>,
    wakeup: Notify,
}

impl PollingTask {
    pub fn new(config: PollingConfig) -> Self {
        Self {
            config,
            jobs: Mutex::new(Vec::new()),
            wakeup: Notify::new(),
        }
    }

    /// Register a job.
    ///
    /// The body returns `Ok(true)` when it did work, `Ok(false)` for
    /// "nothing to do, keep cadence". An error is logged as a
    /// communication problem and the cadence continues.
    pub fn add_task<F, Fut>(
        &self,
        name: impl Into<String>,
        priority: u32,
        body: F,
        frequency: Duration,
        run_immediately: bool,
    ) where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, JobError>> + Send + 'static,
    {
        let name = name.into();
        let first_run = if run_immediately {
            Instant::now()
        } else {
            Instant::now() + frequency
        };

        let job = Arc::new(PollJob {
            name: name.clone(),
            priority,
            frequency,
            body: Box::new(move || -> JobFuture { Box::pin(body()) }),
            next_run: Mutex::new(first_run),
        });

        self.jobs.lock().push(job);
        debug!(job = %name, ?frequency, run_immediately, "polling job added");
        self.wakeup.notify_one();
    }

    /// Pull every job's next run forward to the accelerate delay, for
    /// jobs currently waiting longer than that.
    pub fn accelerate_next_polling(&self) {
        let target = Instant::now() + Duration::from_millis(self.config.accelerate_delay_ms);
        for job in self.jobs.lock().iter() {
            let mut next = job.next_run.lock();
            if *next > target {
                *next = target;
            }
        }
        debug!("polling accelerated");
        self.wakeup.notify_one();
    }

    /// Number of registered jobs.
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Spawn the runner loop, tied to the given scope.
    pub fn spawn(self: Arc<Self>, scope: &SchedulerScope) {
        let task = self;
        let token = scope.child_token();
        let scope_name = scope.name().to_string();

        tokio::spawn(async move {
            info!(scope = %scope_name, "polling runner started");
            task.run(token).await;
            info!(scope = %scope_name, "polling runner stopped");
        });
    }

    async fn run(&self, token: tokio_util::sync::CancellationToken) {
        loop {
            let next_due = self.earliest_due();

            tokio::select! {
                () = token.cancelled() => return,
                () = self.wakeup.notified() => continue,
                () = sleep_until(next_due) => {
                    if token.is_cancelled() {
                        return;
                    }
                    self.run_due_jobs().await;
                }
            }
        }
    }

    fn earliest_due(&self) -> Option<Instant> {
        self.jobs
            .lock()
            .iter()
            .map(|job| *job.next_run.lock())
            .min()
    }

    async fn run_due_jobs(&self) {
        let now = Instant::now();
        let mut due: Vec<Arc<PollJob>> = self
            .jobs
            .lock()
            .iter()
            .filter(|job| *job.next_run.lock() <= now)
            .cloned()
            .collect();
        due.sort_by_key(|job| job.priority);

        for job in due {
            // Reschedule before running so a slow body cannot pile up
            // overlapping runs of itself.
            *job.next_run.lock() = Instant::now() + job.frequency;

            match (job.body)().await {
                Ok(true) => debug!(job = %job.name, "poll did work"),
                Ok(false) => {}
                Err(e) => warn!(job = %job.name, error = %e, "poll failed, keeping cadence"),
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(when) => tokio::time::sleep_until(tokio::time::Instant::from_std(when)).await,
        // No jobs yet: park until a registration wakes the loop.
        None => std::future::pending::<()>().await,
    }
}
