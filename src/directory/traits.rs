//! Collaborator traits.
//!
//! The engine never talks to the network or the database directly: it is
//! handed a [`DirectoryClient`], a [`DirectoryRepository`] and a
//! [`SyncStateStore`] and only reasons about the generic [`FetchError`]
//! taxonomy, never about protocol-specific error payloads.

use super::models::{
    BlockList, Channel, Contact, Entity, EntityId, EntityKind, Group, PictureFetch,
    PrivacySettings, SyncState,
};
use async_trait::async_trait;
use std::time::Duration;

// ── Errors at the remote boundary ───────────────────────────────

/// Failure of a single remote fetch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The remote is throttling us. Not a failure: the queue backs off for
    /// `retry_after` and the category stays stale until the next attempt.
    #[error("rate limited by remote, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
    /// We lack the capability (e.g. invite link of a group we don't admin).
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// Network or server trouble; logged and retried on the next trigger.
    #[error("transient failure: {0}")]
    Transient(String),
    /// The caller stopped waiting before the queue produced a result.
    #[error("fetch abandoned by caller")]
    Cancelled,
    /// The queue worker is gone (engine shut down).
    #[error("fetch queue closed")]
    QueueClosed,
}

impl FetchError {
    /// Expected steady-state outcomes that count as a no-op success.
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::PermissionDenied(_) | Self::NotFound(_))
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

// ── Remote directory client ─────────────────────────────────────

/// One fetch per category of remote data.
///
/// Implementations translate protocol errors into [`FetchError`]; a
/// throttling response must become [`FetchError::RateLimited`] so the
/// fetch queue can honour it.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn fetch_contact_info(&self, id: &EntityId) -> Result<Contact, FetchError>;

    /// Group metadata including the current roster.
    async fn fetch_group_info(&self, id: &EntityId) -> Result<Group, FetchError>;

    async fn fetch_group_invite_link(&self, id: &EntityId) -> Result<String, FetchError>;

    /// Every group the account currently belongs to.
    async fn fetch_joined_groups(&self) -> Result<Vec<Group>, FetchError>;

    async fn fetch_channel_info(&self, id: &EntityId) -> Result<Channel, FetchError>;

    /// Every channel the account is subscribed to.
    async fn fetch_subscribed_channels(&self) -> Result<Vec<Channel>, FetchError>;

    /// `known_picture_id` lets the remote answer "unchanged" cheaply.
    async fn fetch_profile_picture(
        &self,
        id: &EntityId,
        known_picture_id: Option<&str>,
    ) -> Result<PictureFetch, FetchError>;

    async fn fetch_block_list(&self) -> Result<BlockList, FetchError>;

    async fn fetch_privacy_settings(&self) -> Result<PrivacySettings, FetchError>;
}

// ── Persistence ─────────────────────────────────────────────────

/// Local mirror of directory entities.
///
/// `upsert` must be idempotent: concurrent triggers may write the same
/// entity twice and the last write wins.
#[async_trait]
pub trait DirectoryRepository: Send + Sync {
    async fn exists(&self, kind: EntityKind, id: &EntityId) -> anyhow::Result<bool>;

    async fn get(&self, kind: EntityKind, id: &EntityId) -> anyhow::Result<Option<Entity>>;

    async fn upsert(&self, entity: Entity) -> anyhow::Result<()>;

    async fn list_ids(&self, kind: EntityKind) -> anyhow::Result<Vec<EntityId>>;
}

/// Opaque storage of [`SyncState`] records, one per category key.
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    async fn get_sync_state(&self, category: &str) -> anyhow::Result<Option<SyncState>>;

    /// Upsert; an older `last_sync_at` must never replace a newer one.
    async fn put_sync_state(&self, state: SyncState) -> anyhow::Result<()>;
}
