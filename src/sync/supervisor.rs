//! Bounded task group for fire-and-forget sync work.
//!
//! Every spawned task is tracked, bounded by a semaphore, observes the
//! engine-wide shutdown token and has its failure or panic logged here
//! instead of vanishing. [`TaskSupervisor::wait_idle`] lets callers await
//! quiescence deterministically.

use crate::directory::traits::FetchError;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SupervisorStats {
    pub spawned: u64,
    /// Tasks spawned and not yet finished (including those waiting for a slot).
    pub active: usize,
    pub failed: u64,
    /// Tasks that ended on a rate-limit hint. Not counted as failures.
    pub deferred: u64,
    pub panicked: u64,
}

struct Inner {
    tracker: TaskTracker,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
    spawned: AtomicU64,
    failed: AtomicU64,
    deferred: AtomicU64,
    panicked: AtomicU64,
    active: AtomicUsize,
    idle: Notify,
}

#[derive(Clone)]
pub struct TaskSupervisor {
    inner: Arc<Inner>,
}

/// Decrements the active count however the task ends.
struct ActiveGuard(Arc<Inner>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if self.0.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl TaskSupervisor {
    pub fn new(max_in_flight: usize, shutdown: CancellationToken) -> Self {
        Self {
            inner: Arc::new(Inner {
                tracker: TaskTracker::new(),
                permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
                shutdown,
                spawned: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                deferred: AtomicU64::new(0),
                panicked: AtomicU64::new(0),
                active: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Spawn a supervised task. Returns `false` (and drops the future) once
    /// shutdown has begun.
    pub fn spawn<F>(&self, label: impl Into<String>, task: F) -> bool
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let label = label.into();
        if self.inner.shutdown.is_cancelled() {
            tracing::debug!(task = %label, "Supervisor shutting down, task dropped");
            return false;
        }

        self.inner.spawned.fetch_add(1, Ordering::Relaxed);
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);

        self.inner.tracker.spawn(async move {
            let guard = ActiveGuard(inner);
            let inner = &guard.0;

            let _permit = tokio::select! {
                biased;
                _ = inner.shutdown.cancelled() => return,
                permit = Arc::clone(&inner.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };

            // Inner task so a panic surfaces as a JoinError we can count.
            let mut handle = tokio::spawn(task);
            let joined = tokio::select! {
                biased;
                joined = &mut handle => joined,
                _ = inner.shutdown.cancelled() => {
                    handle.abort();
                    tracing::debug!(task = %label, "Task aborted on shutdown");
                    return;
                }
            };

            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    let counter = match e.downcast_ref::<FetchError>() {
                        Some(FetchError::RateLimited { .. }) => &inner.deferred,
                        _ => &inner.failed,
                    };
                    counter.fetch_add(1, Ordering::Relaxed);
                    log_failure(&label, &e);
                }
                Err(e) if e.is_panic() => {
                    inner.panicked.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(task = %label, "Sync task panicked: {e}");
                }
                Err(_) => {}
            }
        });
        true
    }

    /// Resolve once no supervised task is pending or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.active.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn stats(&self) -> SupervisorStats {
        SupervisorStats {
            spawned: self.inner.spawned.load(Ordering::Relaxed),
            active: self.inner.active.load(Ordering::SeqCst),
            failed: self.inner.failed.load(Ordering::Relaxed),
            deferred: self.inner.deferred.load(Ordering::Relaxed),
            panicked: self.inner.panicked.load(Ordering::Relaxed),
        }
    }

    /// Cancel everything and wait until every tracked task has exited.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }
}

pub(crate) fn log_failure(label: &str, error: &anyhow::Error) {
    match error.downcast_ref::<FetchError>() {
        Some(FetchError::RateLimited { retry_after }) => tracing::info!(
            task = label,
            retry_after_ms = retry_after.as_millis() as u64,
            "Sync task deferred by rate limit"
        ),
        Some(FetchError::Cancelled) | Some(FetchError::QueueClosed) => {
            tracing::debug!(task = label, "Sync task stopped: {error}")
        }
        _ => tracing::warn!(task = label, "Sync task failed: {error:#}"),
    }
}
