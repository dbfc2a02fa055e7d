//! Full-sync orchestrator.
//!
//! Runs every top-level category once, in a fixed order, recording each
//! completion. A failing step never stops the run: the first error is
//! returned after every remaining step has been attempted.

use super::operations::SyncOperations;
use crate::directory::models::SyncCategory;
use crate::directory::traits::FetchError;
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Order of a full sync: containers first, then picture backfills over
/// what they produced.
pub const FULL_SYNC_STEPS: [SyncCategory; 7] = [
    SyncCategory::Groups,
    SyncCategory::BlockList,
    SyncCategory::Privacy,
    SyncCategory::Channels,
    SyncCategory::ContactPictures,
    SyncCategory::GroupPictures,
    SyncCategory::ChannelPictures,
];

// ── Progress ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FullSyncPhase {
    #[default]
    Idle,
    Running,
    Completed,
    Cancelled,
}

/// Snapshot of the current or last full sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FullSyncProgress {
    pub phase: FullSyncPhase,
    /// Step being run right now.
    pub current: Option<SyncCategory>,
    pub completed: Vec<SyncCategory>,
    pub failed: Vec<SyncCategory>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

// ── Orchestrator ────────────────────────────────────────────────

pub struct FullSyncOrchestrator {
    operations: Arc<SyncOperations>,
    progress: Mutex<FullSyncProgress>,
}

impl FullSyncOrchestrator {
    pub fn new(operations: Arc<SyncOperations>) -> Self {
        Self {
            operations,
            progress: Mutex::new(FullSyncProgress::default()),
        }
    }

    pub fn progress(&self) -> FullSyncProgress {
        self.progress.lock().clone()
    }

    /// Run every step, checking `cancel` between steps. Returns the first
    /// step error, if any. Only one full sync may run at a time.
    pub async fn run_full_sync(&self, cancel: &CancellationToken) -> Result<()> {
        {
            let mut progress = self.progress.lock();
            if progress.phase == FullSyncPhase::Running {
                bail!("A full sync is already running");
            }
            *progress = FullSyncProgress {
                phase: FullSyncPhase::Running,
                started_at: Some(Utc::now()),
                ..FullSyncProgress::default()
            };
        }

        let started = Instant::now();
        tracing::info!(steps = FULL_SYNC_STEPS.len(), "Full sync started");
        let mut first_error: Option<anyhow::Error> = None;

        for step in FULL_SYNC_STEPS {
            if cancel.is_cancelled() {
                self.finish(FullSyncPhase::Cancelled);
                tracing::info!(before = %step, "Full sync cancelled");
                return Err(first_error.unwrap_or_else(|| FetchError::Cancelled.into()));
            }

            self.progress.lock().current = Some(step);
            match self.operations.run_category(step, cancel).await {
                Ok(()) => self.progress.lock().completed.push(step),
                Err(e) => {
                    tracing::warn!(step = %step, "Full sync step failed: {e:#}");
                    self.progress.lock().failed.push(step);
                    if first_error.is_none() {
                        first_error = Some(e.context(format!("Full sync step '{step}' failed")));
                    }
                }
            }
        }

        let progress = self.finish(FullSyncPhase::Completed);
        tracing::info!(
            completed = progress.completed.len(),
            failed = progress.failed.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Full sync finished"
        );
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn finish(&self, phase: FullSyncPhase) -> FullSyncProgress {
        let mut progress = self.progress.lock();
        progress.phase = phase;
        progress.current = None;
        progress.finished_at = Some(Utc::now());
        progress.clone()
    }
}
