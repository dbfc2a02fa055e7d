//! Rate-limited fetch queue.
//!
//! Every remote call goes through one worker that runs requests strictly in
//! arrival order, one at a time. After each request the worker pauses:
//!
//! - for exactly `retry_after` when the request reported
//!   [`FetchError::RateLimited`];
//! - for the configured courtesy delay otherwise.
//!
//! Callers that stop waiting (their cancellation token fires) detach from
//! the request; the request itself still runs when its turn comes and its
//! result is dropped. There is no depth limit beyond the channel capacity
//! and no shedding: under load, callers simply wait longer.

use crate::config::QueueConfig;
use crate::directory::traits::FetchError;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// A queued unit of work. Running it delivers the result to the submitter
/// and yields the backoff hint, if any.
struct FetchRequest {
    label: String,
    run: Box<dyn FnOnce() -> BoxFuture<Option<Duration>> + Send>,
}

#[derive(Debug, Default)]
struct QueueCounters {
    depth: AtomicUsize,
    processed: AtomicU64,
    rate_limited: AtomicU64,
}

/// Point-in-time queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Requests submitted but not yet picked up by the worker.
    pub depth: usize,
    pub processed: u64,
    pub rate_limited: u64,
}

/// Handle for submitting work to the shared worker. Cheap to clone.
#[derive(Clone)]
pub struct FetchQueue {
    tx: mpsc::Sender<FetchRequest>,
    counters: Arc<QueueCounters>,
}

impl FetchQueue {
    /// Create the queue and spawn its worker. The worker exits when
    /// `shutdown` fires or every handle has been dropped.
    pub fn spawn(config: &QueueConfig, shutdown: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let counters = Arc::new(QueueCounters::default());

        let worker = QueueWorker {
            rx,
            min_delay: config.min_delay(),
            counters: Arc::clone(&counters),
            shutdown,
        };
        let handle = tokio::spawn(worker.run());

        (Self { tx, counters }, handle)
    }

    /// Enqueue `operation` and wait for its result.
    ///
    /// Returns [`FetchError::Cancelled`] as soon as `cancel` fires; the
    /// operation is not cancelled with it. Errors from the operation are
    /// returned unchanged.
    pub async fn submit<T, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T, FetchError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let request = FetchRequest {
            label: label.to_string(),
            run: Box::new(move || -> BoxFuture<Option<Duration>> {
                Box::pin(async move {
                    let result = operation().await;
                    let retry_after = result.as_ref().err().and_then(FetchError::retry_after);
                    // The submitter may have detached; the result is dropped then.
                    let _ = result_tx.send(result);
                    retry_after
                })
            }),
        };

        self.counters.depth.fetch_add(1, Ordering::Relaxed);
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.counters.depth.fetch_sub(1, Ordering::Relaxed);
                return Err(FetchError::Cancelled);
            }
            sent = self.tx.send(request) => sent,
        };
        if sent.is_err() {
            self.counters.depth.fetch_sub(1, Ordering::Relaxed);
            return Err(FetchError::QueueClosed);
        }

        tokio::select! {
            biased;
            result = result_rx => result.unwrap_or(Err(FetchError::QueueClosed)),
            _ = cancel.cancelled() => {
                tracing::debug!(op = label, "Caller detached from queued fetch");
                Err(FetchError::Cancelled)
            }
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            depth: self.counters.depth.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
            rate_limited: self.counters.rate_limited.load(Ordering::Relaxed),
        }
    }
}

struct QueueWorker {
    rx: mpsc::Receiver<FetchRequest>,
    min_delay: Duration,
    counters: Arc<QueueCounters>,
    shutdown: CancellationToken,
}

impl QueueWorker {
    async fn run(mut self) {
        tracing::info!(
            min_delay_ms = self.min_delay.as_millis() as u64,
            "Fetch queue worker started"
        );

        loop {
            let request = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(request) => request,
                    None => break,
                },
            };
            self.counters.depth.fetch_sub(1, Ordering::Relaxed);

            let label = request.label;
            tracing::trace!(op = %label, "Running queued fetch");

            // Own task so a panicking operation can't take the worker down.
            let mut task = tokio::spawn((request.run)());
            let outcome = tokio::select! {
                biased;
                joined = &mut task => joined,
                _ = self.shutdown.cancelled() => {
                    task.abort();
                    tracing::debug!(op = %label, "Aborted in-flight fetch on shutdown");
                    break;
                }
            };
            self.counters.processed.fetch_add(1, Ordering::Relaxed);

            let delay = match outcome {
                Ok(Some(retry_after)) => {
                    self.counters.rate_limited.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        op = %label,
                        retry_after_ms = retry_after.as_millis() as u64,
                        "Remote is throttling, pausing fetch queue"
                    );
                    retry_after
                }
                Ok(None) => self.min_delay,
                Err(e) => {
                    tracing::error!(op = %label, "Queued fetch panicked: {e}");
                    self.min_delay
                }
            };

            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        // Unserved requests are dropped; their submitters see `QueueClosed`.
        self.rx.close();
        let mut dropped = 0usize;
        while self.rx.try_recv().is_ok() {
            self.counters.depth.fetch_sub(1, Ordering::Relaxed);
            dropped += 1;
        }
        tracing::info!(dropped, "Fetch queue worker stopped");
    }
}
