//! Periodic scheduler: one timer loop per category job.
//!
//! Each loop ticks on a short cadence and runs its job only once the
//! category's recorded completion is older than the job interval, so a
//! restart neither re-runs fresh work nor forgets stale work.

use super::state::SyncStateRegistry;
use super::supervisor::log_failure;
use crate::directory::models::SyncCategory;
use chrono::Utc;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
pub type JobOperation = Arc<dyn Fn(CancellationToken) -> JobFuture + Send + Sync>;

/// A named periodic job. The category doubles as its registry key.
#[derive(Clone)]
pub struct SchedulerJob {
    pub category: SyncCategory,
    pub interval: Duration,
    pub operation: JobOperation,
}

impl SchedulerJob {
    pub fn new<F, Fut>(category: SyncCategory, interval: Duration, operation: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            category,
            interval,
            operation: Arc::new(move |cancel| -> JobFuture { Box::pin(operation(cancel)) }),
        }
    }
}

impl std::fmt::Debug for SchedulerJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerJob")
            .field("category", &self.category)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

struct RunningJobs {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

pub struct PeriodicScheduler {
    registry: SyncStateRegistry,
    tick: Duration,
    parent: CancellationToken,
    running: Mutex<Option<RunningJobs>>,
}

impl PeriodicScheduler {
    /// Loops stop on [`stop`](Self::stop) or when `parent` is cancelled.
    pub fn new(registry: SyncStateRegistry, tick: Duration, parent: CancellationToken) -> Self {
        Self {
            registry,
            tick,
            parent,
            running: Mutex::new(None),
        }
    }

    /// Launch one loop per job. A no-op returning `false` while already
    /// running or after `parent` was cancelled.
    pub fn start(&self, jobs: Vec<SchedulerJob>) -> bool {
        if self.parent.is_cancelled() {
            tracing::debug!("Scheduler parent cancelled, ignoring start");
            return false;
        }
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.cancel.is_cancelled()) {
            tracing::warn!("Scheduler already running, ignoring start");
            return false;
        }

        let cancel = self.parent.child_token();
        let tracker = TaskTracker::new();
        let count = jobs.len();
        for job in jobs {
            tracing::debug!(
                job = %job.category,
                interval_secs = job.interval.as_secs(),
                "Scheduling job"
            );
            tracker.spawn(run_job(job, self.registry.clone(), self.tick, cancel.clone()));
        }
        tracker.close();

        tracing::info!(jobs = count, tick_secs = self.tick.as_secs(), "Scheduler started");
        *running = Some(RunningJobs { cancel, tracker });
        true
    }

    /// Cancel every loop and wait for in-flight runs to finish.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.cancel.cancel();
        running.tracker.wait().await;
        tracing::info!("Scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.cancel.is_cancelled())
    }
}

async fn run_job(
    job: SchedulerJob,
    registry: SyncStateRegistry,
    tick: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match registry.should_run(job.category, job.interval).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::trace!(job = %job.category, "Not due yet");
                continue;
            }
            Err(e) => {
                tracing::warn!(job = %job.category, "Cannot read sync state, skipping tick: {e:#}");
                continue;
            }
        }

        tracing::info!(job = %job.category, "Running scheduled sync");
        // Own task so a panicking job can't end the loop. Not aborted on
        // stop: the job sees `cancel` and winds down itself.
        let outcome = tokio::spawn((job.operation)(cancel.clone())).await;
        match outcome {
            Ok(Ok(())) => {
                if let Err(e) = registry.put(job.category, Utc::now()).await {
                    tracing::warn!(job = %job.category, "Failed to record completion: {e:#}");
                }
            }
            Ok(Err(e)) => log_failure(job.category.as_str(), &e),
            Err(e) => tracing::error!(job = %job.category, "Scheduled job panicked: {e}"),
        }
    }

    tracing::debug!(job = %job.category, "Job loop exited");
}
