//! Sync state registry: when did each category last complete?
//!
//! Thin layer over a [`SyncStateStore`]. No caching: every scheduler tick
//! re-reads, so a completion recorded by another engine instance sharing
//! the store is visible on the next tick.

use crate::directory::models::{SyncCategory, SyncState};
use crate::directory::traits::SyncStateStore;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Whether more than `interval` has elapsed between `last` and `now`.
///
/// A `last` in the future (clock stepped backwards) is never due.
pub fn is_due(last: DateTime<Utc>, interval: Duration, now: DateTime<Utc>) -> bool {
    let elapsed = now.signed_duration_since(last);
    match chrono::Duration::from_std(interval) {
        Ok(interval) => elapsed > interval,
        // Interval too large to represent: treat as "never".
        Err(_) => false,
    }
}

#[derive(Clone)]
pub struct SyncStateRegistry {
    store: Arc<dyn SyncStateStore>,
}

impl SyncStateRegistry {
    pub fn new(store: Arc<dyn SyncStateStore>) -> Self {
        Self { store }
    }

    pub async fn state(&self, category: SyncCategory) -> Result<Option<SyncState>> {
        self.store.get_sync_state(category.as_str()).await
    }

    /// Last completion time, or the Unix epoch if the category never completed.
    pub async fn get(&self, category: SyncCategory) -> Result<DateTime<Utc>> {
        Ok(self
            .state(category)
            .await?
            .map(|s| s.last_sync_at)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH))
    }

    pub async fn put(&self, category: SyncCategory, at: DateTime<Utc>) -> Result<()> {
        tracing::debug!(category = %category, at = %at, "Recording sync completion");
        self.store.put_sync_state(SyncState::new(category, at)).await
    }

    pub async fn put_with_marker(
        &self,
        category: SyncCategory,
        at: DateTime<Utc>,
        marker: Vec<u8>,
    ) -> Result<()> {
        let mut state = SyncState::new(category, at);
        state.progress_marker = Some(marker);
        self.store.put_sync_state(state).await
    }

    pub async fn should_run_at(
        &self,
        category: SyncCategory,
        interval: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let last = self.get(category).await?;
        Ok(is_due(last, interval, now))
    }

    pub async fn should_run(&self, category: SyncCategory, interval: Duration) -> Result<bool> {
        self.should_run_at(category, interval, Utc::now()).await
    }

    /// Last completion of every category (`None` = never).
    pub async fn snapshot(&self) -> Result<Vec<(SyncCategory, Option<DateTime<Utc>>)>> {
        let mut out = Vec::with_capacity(SyncCategory::ALL.len());
        for category in SyncCategory::ALL {
            let last = self.state(category).await?.map(|s| s.last_sync_at);
            out.push((category, last));
        }
        Ok(out)
    }
}
