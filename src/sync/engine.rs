//! Engine facade: wires the queue, dispatcher, scheduler and orchestrator
//! around the caller's collaborators and owns their lifecycle.

use super::dispatcher::CoalescenceDispatcher;
use super::events::DirectoryEvent;
use super::operations::SyncOperations;
use super::orchestrator::{FullSyncOrchestrator, FullSyncProgress};
use super::queue::{FetchQueue, QueueStats};
use super::scheduler::{PeriodicScheduler, SchedulerJob};
use super::state::SyncStateRegistry;
use super::supervisor::{SupervisorStats, TaskSupervisor};
use crate::config::Config;
use crate::directory::models::SyncCategory;
use crate::directory::normalizer::IdentifierNormalizer;
use crate::directory::traits::{DirectoryClient, DirectoryRepository, SyncStateStore};
use crate::store::SqliteDirectoryStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize)]
pub struct CategoryStatus {
    pub category: SyncCategory,
    /// `None` if the category never completed.
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of the whole engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub queue: QueueStats,
    pub tasks: SupervisorStats,
    pub scheduler_running: bool,
    pub categories: Vec<CategoryStatus>,
    pub full_sync: FullSyncProgress,
    pub shut_down: bool,
}

pub struct SyncEngine {
    config: Config,
    shutdown: CancellationToken,
    operations: Arc<SyncOperations>,
    supervisor: TaskSupervisor,
    dispatcher: CoalescenceDispatcher,
    scheduler: PeriodicScheduler,
    orchestrator: FullSyncOrchestrator,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Build the engine and spawn the fetch-queue worker. Must be called
    /// from within a tokio runtime.
    pub fn new<R>(
        config: Config,
        client: Arc<dyn DirectoryClient>,
        repository: Arc<R>,
        normalizer: Arc<dyn IdentifierNormalizer>,
    ) -> Result<Self>
    where
        R: DirectoryRepository + SyncStateStore + 'static,
    {
        config.validate()?;

        let shutdown = CancellationToken::new();
        let (queue, worker) = FetchQueue::spawn(&config.queue, shutdown.clone());
        let registry = SyncStateRegistry::new(repository.clone());
        let operations = Arc::new(SyncOperations::new(
            client,
            repository,
            normalizer,
            queue,
            registry.clone(),
        ));

        let supervisor = TaskSupervisor::new(config.dispatcher.max_in_flight, shutdown.clone());
        let dispatcher = CoalescenceDispatcher::new(
            Arc::clone(&operations),
            supervisor.clone(),
            shutdown.clone(),
        );
        let scheduler = PeriodicScheduler::new(registry, config.scheduler.tick(), shutdown.clone());
        let orchestrator = FullSyncOrchestrator::new(Arc::clone(&operations));

        tracing::info!(
            min_delay_ms = config.queue.min_delay_ms,
            max_in_flight = config.dispatcher.max_in_flight,
            jobs = config.scheduler.jobs.len(),
            "Sync engine ready"
        );

        Ok(Self {
            config,
            shutdown,
            operations,
            supervisor,
            dispatcher,
            scheduler,
            orchestrator,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Same as [`new`](Self::new), backed by the SQLite store at the
    /// configured database path.
    pub fn with_sqlite(
        config: Config,
        client: Arc<dyn DirectoryClient>,
        normalizer: Arc<dyn IdentifierNormalizer>,
    ) -> Result<Self> {
        let path = config.resolved_database_path()?;
        let store = Arc::new(
            SqliteDirectoryStore::open(&path)
                .with_context(|| format!("Failed to open mirror at {}", path.display()))?,
        );
        Self::new(config, client, store, normalizer)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Event entry point. Never blocks on the remote; returns the number of
    /// sync tasks launched.
    pub fn handle(&self, event: &DirectoryEvent) -> usize {
        self.dispatcher.handle(event)
    }

    /// Call once the upstream connection is up: full sync (if configured),
    /// then start the scheduler. The scheduler starts even when the full
    /// sync reported an error; that error is returned.
    pub async fn on_connected(&self) -> Result<()> {
        let full_sync = if self.config.full_sync_on_connect {
            self.run_full_sync().await
        } else {
            Ok(())
        };
        if !self.shutdown.is_cancelled() {
            self.start_scheduler();
        }
        full_sync
    }

    pub async fn run_full_sync(&self) -> Result<()> {
        self.orchestrator.run_full_sync(&self.shutdown).await
    }

    /// Sync one category now and record its completion.
    pub async fn sync_category(&self, category: SyncCategory) -> Result<()> {
        self.operations.run_category(category, &self.shutdown).await
    }

    /// Enabled jobs of the configured table.
    pub fn scheduler_jobs(&self) -> Vec<SchedulerJob> {
        self.config
            .scheduler
            .jobs
            .iter()
            .filter(|job| job.enabled)
            .map(|job| {
                let category = job.category;
                let operations = Arc::clone(&self.operations);
                SchedulerJob::new(category, job.interval(), move |cancel| {
                    let operations = Arc::clone(&operations);
                    async move { operations.perform_category(category, &cancel).await }
                })
            })
            .collect()
    }

    pub fn start_scheduler(&self) -> bool {
        self.scheduler.start(self.scheduler_jobs())
    }

    pub async fn stop_scheduler(&self) {
        self.scheduler.stop().await;
    }

    /// Resolve once every dispatched sync task has finished.
    pub async fn wait_idle(&self) {
        self.supervisor.wait_idle().await;
    }

    pub async fn status(&self) -> Result<EngineStatus> {
        let categories = self
            .operations
            .registry()
            .snapshot()
            .await?
            .into_iter()
            .map(|(category, last_sync_at)| CategoryStatus {
                category,
                last_sync_at,
            })
            .collect();

        Ok(EngineStatus {
            queue: self.operations.queue().stats(),
            tasks: self.supervisor.stats(),
            scheduler_running: self.scheduler.is_running(),
            categories,
            full_sync: self.orchestrator.progress(),
            shut_down: self.shutdown.is_cancelled(),
        })
    }

    /// Cancel everything, stop the scheduler, drain dispatched tasks and
    /// join the queue worker. Idempotent.
    pub async fn shutdown(&self) {
        tracing::info!("Sync engine shutting down");
        self.shutdown.cancel();
        self.scheduler.stop().await;
        self.supervisor.shutdown().await;

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::warn!("Fetch queue worker ended abnormally: {e}");
            }
        }
        tracing::info!("Sync engine stopped");
    }
}
