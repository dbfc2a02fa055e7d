//! Sync operations: per-entity syncs triggered by intents and whole-category
//! syncs run by the scheduler and the full-sync orchestrator.
//!
//! Every remote call goes through the [`FetchQueue`]. Soft errors
//! (`NotFound`, `PermissionDenied`) are treated as a successful no-op;
//! anything else propagates to the supervising task, which logs it.

use super::intents::{IntentKind, SyncIntent};
use super::queue::FetchQueue;
use super::state::SyncStateRegistry;
use crate::directory::models::{
    Chat, Entity, EntityId, EntityKind, Group, PictureFetch, ProfilePicture, SyncCategory,
    SELF_ROW_ID,
};
use crate::directory::normalizer::IdentifierNormalizer;
use crate::directory::traits::{DirectoryClient, DirectoryRepository, FetchError};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct SyncOperations {
    client: Arc<dyn DirectoryClient>,
    repository: Arc<dyn DirectoryRepository>,
    normalizer: Arc<dyn IdentifierNormalizer>,
    queue: FetchQueue,
    registry: SyncStateRegistry,
}

impl SyncOperations {
    pub fn new(
        client: Arc<dyn DirectoryClient>,
        repository: Arc<dyn DirectoryRepository>,
        normalizer: Arc<dyn IdentifierNormalizer>,
        queue: FetchQueue,
        registry: SyncStateRegistry,
    ) -> Self {
        Self {
            client,
            repository,
            normalizer,
            queue,
            registry,
        }
    }

    pub fn queue(&self) -> &FetchQueue {
        &self.queue
    }

    pub fn registry(&self) -> &SyncStateRegistry {
        &self.registry
    }

    /// Run `call` against the remote client on the shared queue.
    async fn fetch<T, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        call: F,
    ) -> Result<T, FetchError>
    where
        F: FnOnce(Arc<dyn DirectoryClient>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
        T: Send + 'static,
    {
        let client = Arc::clone(&self.client);
        self.queue.submit(label, cancel, move || call(client)).await
    }

    // ── Intents ─────────────────────────────────────────────────

    /// Normalize, apply the existence guard, then run the matching sync.
    pub async fn run_intent(&self, intent: SyncIntent, cancel: &CancellationToken) -> Result<()> {
        let target = match &intent.target {
            Some(raw) => Some(self.normalizer.normalize(raw).await),
            None => None,
        };

        if let (Some(kind), Some(id)) = (intent.kind.guard(), target.as_ref()) {
            if self.repository.exists(kind, id).await? {
                tracing::trace!(
                    intent = intent.kind.as_str(),
                    id = %id,
                    trigger = intent.trigger,
                    "Already known, skipping"
                );
                return Ok(());
            }
        }

        tracing::debug!(
            intent = intent.kind.as_str(),
            target = ?target.as_ref().map(EntityId::as_str),
            trigger = intent.trigger,
            "Running sync intent"
        );

        match (intent.kind, target) {
            (IntentKind::EnsureContact, Some(id)) => self.sync_contact(&id, cancel).await,
            (IntentKind::EnsureChat, Some(id)) => self.ensure_chat(&id).await,
            (IntentKind::EnsureGroup | IntentKind::SyncGroup, Some(id)) => {
                self.sync_group(&id, cancel).await
            }
            (IntentKind::RefreshGroupInfo, Some(id)) => self.refresh_group_info(&id, cancel).await,
            (IntentKind::EnsureChannel | IntentKind::SyncChannel, Some(id)) => {
                self.sync_channel(&id, cancel).await
            }
            (IntentKind::RefreshPicture, Some(id)) => self.refresh_picture(&id, cancel).await,
            (IntentKind::RefreshBlockList, _) => {
                self.run_category(SyncCategory::BlockList, cancel).await
            }
            (IntentKind::RefreshPrivacy, _) => {
                self.run_category(SyncCategory::Privacy, cancel).await
            }
            (kind, None) => bail!("Intent {} requires a target", kind.as_str()),
        }
    }

    // ── Per-entity syncs ────────────────────────────────────────

    /// Contact info, then profile picture.
    pub async fn sync_contact(&self, id: &EntityId, cancel: &CancellationToken) -> Result<()> {
        self.refresh_contact_info(id, cancel).await?;
        self.refresh_picture(id, cancel).await
    }

    async fn refresh_contact_info(&self, id: &EntityId, cancel: &CancellationToken) -> Result<()> {
        let target = id.clone();
        let fetched = self
            .fetch("contact_info", cancel, move |client| async move {
                client.fetch_contact_info(&target).await
            })
            .await;
        let Some(mut contact) = soften(fetched, "contact", id)? else {
            return Ok(());
        };
        contact.id = id.clone();
        self.repository
            .upsert(Entity::Contact(contact))
            .await
            .with_context(|| format!("Failed to store contact {id}"))
    }

    /// Group info with roster, invite link and picture.
    pub async fn sync_group(&self, id: &EntityId, cancel: &CancellationToken) -> Result<()> {
        let target = id.clone();
        let fetched = self
            .fetch("group_info", cancel, move |client| async move {
                client.fetch_group_info(&target).await
            })
            .await;
        let Some(mut group) = soften(fetched, "group", id)? else {
            return Ok(());
        };
        group.id = id.clone();
        group.invite_link = match self.invite_link(id, cancel).await {
            Ok(link) => link,
            Err(e @ (FetchError::Cancelled | FetchError::QueueClosed)) => return Err(e.into()),
            Err(e) => {
                tracing::warn!(group = %id, "Invite link fetch failed, keeping stored one: {e}");
                self.stored_invite_link(id).await?
            }
        };
        self.upsert_group(group).await?;
        self.refresh_picture(id, cancel).await
    }

    /// Group metadata only. Keeps the stored invite link.
    pub async fn refresh_group_info(&self, id: &EntityId, cancel: &CancellationToken) -> Result<()> {
        let target = id.clone();
        let fetched = self
            .fetch("group_info", cancel, move |client| async move {
                client.fetch_group_info(&target).await
            })
            .await;
        let Some(mut group) = soften(fetched, "group", id)? else {
            return Ok(());
        };
        group.id = id.clone();
        group.invite_link = self.stored_invite_link(id).await?;
        self.upsert_group(group).await
    }

    /// `None` when we may not see the link.
    async fn invite_link(
        &self,
        id: &EntityId,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, FetchError> {
        let target = id.clone();
        let fetched = self
            .fetch("group_invite_link", cancel, move |client| async move {
                client.fetch_group_invite_link(&target).await
            })
            .await;
        soften(fetched, "invite link", id)
    }

    async fn stored_invite_link(&self, id: &EntityId) -> Result<Option<String>> {
        Ok(match self.repository.get(EntityKind::Group, id).await? {
            Some(Entity::Group(existing)) => existing.invite_link,
            _ => None,
        })
    }

    async fn upsert_group(&self, group: Group) -> Result<()> {
        let id = group.id.clone();
        self.repository
            .upsert(Entity::Group(group))
            .await
            .with_context(|| format!("Failed to store group {id}"))
    }

    /// Channel info, then picture.
    pub async fn sync_channel(&self, id: &EntityId, cancel: &CancellationToken) -> Result<()> {
        let target = id.clone();
        let fetched = self
            .fetch("channel_info", cancel, move |client| async move {
                client.fetch_channel_info(&target).await
            })
            .await;
        let Some(mut channel) = soften(fetched, "channel", id)? else {
            return Ok(());
        };
        channel.id = id.clone();
        self.repository
            .upsert(Entity::Channel(channel))
            .await
            .with_context(|| format!("Failed to store channel {id}"))?;
        self.refresh_picture(id, cancel).await
    }

    /// Re-fetch a profile picture, passing the stored picture id so an
    /// unchanged picture is not rewritten.
    pub async fn refresh_picture(&self, id: &EntityId, cancel: &CancellationToken) -> Result<()> {
        let stored = match self.repository.get(EntityKind::ProfilePicture, id).await? {
            Some(Entity::ProfilePicture(picture)) => Some(picture),
            _ => None,
        };
        let known = stored.as_ref().and_then(|p| p.picture_id.clone());

        let target = id.clone();
        let fetched = self
            .fetch("profile_picture", cancel, move |client| async move {
                client.fetch_profile_picture(&target, known.as_deref()).await
            })
            .await;

        let picture = match soften(fetched, "profile picture", id)? {
            None | Some(PictureFetch::Unchanged) => return Ok(()),
            Some(PictureFetch::Removed) => {
                if matches!(&stored, Some(p) if p.picture_id.is_none()) {
                    return Ok(());
                }
                ProfilePicture {
                    owner: id.clone(),
                    picture_id: None,
                    url: None,
                    fetched_at: Utc::now(),
                }
            }
            Some(PictureFetch::Updated(mut picture)) => {
                picture.owner = id.clone();
                picture
            }
        };
        self.repository
            .upsert(Entity::ProfilePicture(picture))
            .await
            .with_context(|| format!("Failed to store profile picture of {id}"))
    }

    /// Chats are local records; nothing to fetch.
    pub async fn ensure_chat(&self, id: &EntityId) -> Result<()> {
        self.repository
            .upsert(Entity::Chat(Chat {
                id: id.clone(),
                kind: id.kind_hint(),
                created_at: Utc::now(),
            }))
            .await
            .with_context(|| format!("Failed to store chat {id}"))
    }

    // ── Categories ──────────────────────────────────────────────

    /// Sync a whole category and record its completion.
    pub async fn run_category(&self, category: SyncCategory, cancel: &CancellationToken) -> Result<()> {
        let started = Instant::now();
        self.perform_category(category, cancel).await?;
        self.registry
            .put(category, Utc::now())
            .await
            .with_context(|| format!("Failed to record completion of {category}"))?;
        tracing::info!(
            category = %category,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Category synced"
        );
        Ok(())
    }

    /// Sync a whole category without touching the registry. The caller
    /// records completion.
    pub async fn perform_category(
        &self,
        category: SyncCategory,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match category {
            SyncCategory::Contacts => {
                let mut tally = Tally::default();
                for id in self.repository.list_ids(EntityKind::Contact).await? {
                    stop_if_cancelled(cancel)?;
                    tally.record(&id, self.refresh_contact_info(&id, cancel).await)?;
                }
                tally.finish(category, false)
            }
            SyncCategory::Chats => {
                tracing::debug!("Chats are local only, nothing to fetch");
                Ok(())
            }
            SyncCategory::Groups => {
                let fetched = self
                    .fetch("joined_groups", cancel, |client| async move {
                        client.fetch_joined_groups().await
                    })
                    .await;
                let groups = soften(fetched, "joined groups", &EntityId::new(SELF_ROW_ID))?
                    .unwrap_or_default();
                tracing::debug!(count = groups.len(), "Fetched joined groups");

                let mut tally = Tally::default();
                for mut group in groups {
                    stop_if_cancelled(cancel)?;
                    let id = self.normalizer.normalize(&group.id).await;
                    group.id = id.clone();
                    group.invite_link = match self.invite_link(&id, cancel).await {
                        Ok(link) => {
                            tally.record(&id, Ok(()))?;
                            link
                        }
                        Err(e) => {
                            let kept = self.stored_invite_link(&id).await?;
                            tally.record(&id, Err(e.into()))?;
                            kept
                        }
                    };
                    self.upsert_group(group).await?;
                }
                tally.finish(category, false)
            }
            SyncCategory::Channels => {
                let fetched = self
                    .fetch("subscribed_channels", cancel, |client| async move {
                        client.fetch_subscribed_channels().await
                    })
                    .await;
                let channels = soften(fetched, "subscribed channels", &EntityId::new(SELF_ROW_ID))?
                    .unwrap_or_default();
                tracing::debug!(count = channels.len(), "Fetched subscribed channels");
                for mut channel in channels {
                    channel.id = self.normalizer.normalize(&channel.id).await;
                    self.repository.upsert(Entity::Channel(channel)).await?;
                }
                Ok(())
            }
            SyncCategory::BlockList => {
                let fetched = self
                    .fetch("block_list", cancel, |client| async move {
                        client.fetch_block_list().await
                    })
                    .await;
                if let Some(list) = soften(fetched, "block list", &EntityId::new(SELF_ROW_ID))? {
                    tracing::debug!(blocked = list.blocked.len(), "Fetched block list");
                    self.repository.upsert(Entity::BlockList(list)).await?;
                }
                Ok(())
            }
            SyncCategory::Privacy => {
                let fetched = self
                    .fetch("privacy_settings", cancel, |client| async move {
                        client.fetch_privacy_settings().await
                    })
                    .await;
                if let Some(settings) = soften(fetched, "privacy settings", &EntityId::new(SELF_ROW_ID))? {
                    self.repository
                        .upsert(Entity::PrivacySettings(settings))
                        .await?;
                }
                Ok(())
            }
            SyncCategory::ContactPictures => {
                self.backfill_pictures(category, EntityKind::Contact, cancel)
                    .await
            }
            SyncCategory::GroupPictures => {
                self.backfill_pictures(category, EntityKind::Group, cancel).await
            }
            SyncCategory::ChannelPictures => {
                self.backfill_pictures(category, EntityKind::Channel, cancel)
                    .await
            }
        }
    }

    /// Refresh the picture of every stored entity of `owners`. Partial
    /// failures are logged and retried at the next run. A sweep where
    /// nothing succeeded, or the remote throttled us, fails the category.
    async fn backfill_pictures(
        &self,
        category: SyncCategory,
        owners: EntityKind,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut tally = Tally::default();
        for id in self.repository.list_ids(owners).await? {
            stop_if_cancelled(cancel)?;
            tally.record(&id, self.refresh_picture(&id, cancel).await)?;
        }
        tally.finish(category, true)
    }
}

/// Turn soft errors into `Ok(None)`.
fn soften<T>(
    result: Result<T, FetchError>,
    what: &str,
    id: &EntityId,
) -> Result<Option<T>, FetchError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_soft() => {
            tracing::debug!(id = %id, "No {what} available: {e}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn stop_if_cancelled(cancel: &CancellationToken) -> Result<(), FetchError> {
    if cancel.is_cancelled() {
        return Err(FetchError::Cancelled);
    }
    Ok(())
}

/// Per-entity outcomes of a category sweep.
#[derive(Default)]
struct Tally {
    ok: usize,
    failed: usize,
    rate_limited: bool,
    first_error: Option<anyhow::Error>,
}

impl Tally {
    /// Count one outcome. Cancellation and queue shutdown abort the sweep.
    fn record(&mut self, id: &EntityId, outcome: Result<()>) -> Result<()> {
        match outcome {
            Ok(()) => self.ok += 1,
            Err(e) => {
                match e.downcast_ref::<FetchError>() {
                    Some(FetchError::Cancelled | FetchError::QueueClosed) => return Err(e),
                    Some(FetchError::RateLimited { .. }) => self.rate_limited = true,
                    _ => {}
                }
                tracing::debug!(id = %id, "Entity sync failed: {e:#}");
                self.failed += 1;
                self.first_error.get_or_insert(e);
            }
        }
        Ok(())
    }

    /// `tolerate_partial` accepts failures as long as some entity synced
    /// and none was rate limited.
    fn finish(self, category: SyncCategory, tolerate_partial: bool) -> Result<()> {
        if self.failed == 0 {
            return Ok(());
        }
        tracing::warn!(
            category = %category,
            ok = self.ok,
            failed = self.failed,
            "Some entities failed to sync"
        );
        let tolerated = tolerate_partial && self.ok > 0 && !self.rate_limited;
        match self.first_error {
            Some(e) if !tolerated => Err(e.context(format!(
                "{} of {} entities failed in {category}",
                self.failed,
                self.ok + self.failed
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::models::{BlockList, Contact};
    use crate::testing::Harness;
    use std::time::Duration;

    fn ensure_contact(id: &str) -> SyncIntent {
        SyncIntent {
            target: Some(id.into()),
            kind: IntentKind::EnsureContact,
            trigger: "test",
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_sender_fetched_exactly_once_under_normalized_id() {
        let h = Harness::new();
        h.normalizer
            .learn("lid-7@lid".into(), "7@s.whatsapp.net".into());

        h.operations
            .run_intent(ensure_contact("lid-7@lid"), &h.cancel)
            .await
            .unwrap();

        assert_eq!(
            h.client.calls_to("contact_info"),
            vec!["contact_info:7@s.whatsapp.net"]
        );
        assert!(h
            .store
            .exists(EntityKind::Contact, &"7@s.whatsapp.net".into())
            .await
            .unwrap());
        assert!(!h
            .store
            .exists(EntityKind::Contact, &"lid-7@lid".into())
            .await
            .unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn known_entity_is_not_fetched() {
        let h = Harness::new();
        h.store
            .upsert(Entity::Contact(Contact {
                id: "1@s.whatsapp.net".into(),
                full_name: None,
                push_name: None,
                business_name: None,
            }))
            .await
            .unwrap();

        h.operations
            .run_intent(ensure_contact("1@s.whatsapp.net"), &h.cancel)
            .await
            .unwrap();
        assert!(h.client.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_triggers_fetch_twice_store_once() {
        let h = Harness::new();
        let (a, b) = tokio::join!(
            h.operations.run_intent(ensure_contact("3@s.whatsapp.net"), &h.cancel),
            h.operations.run_intent(ensure_contact("3@s.whatsapp.net"), &h.cancel),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(h.client.calls_to("contact_info").len(), 2);
        assert_eq!(h.store.count(EntityKind::Contact).unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn soft_errors_are_no_ops() {
        let h = Harness::new();
        h.client
            .fail_next("contact_info", FetchError::NotFound("gone".into()));

        h.operations
            .run_intent(ensure_contact("4@s.whatsapp.net"), &h.cancel)
            .await
            .unwrap();
        assert_eq!(h.store.count(EntityKind::Contact).unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_propagate() {
        let h = Harness::new();
        h.client
            .fail_next("contact_info", FetchError::Transient("reset".into()));

        let err = h
            .operations
            .run_intent(ensure_contact("4@s.whatsapp.net"), &h.cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FetchError>(),
            Some(FetchError::Transient(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn group_sync_without_invite_permission_stores_group() {
        let h = Harness::new();
        h.client.fail_next(
            "group_invite_link",
            FetchError::PermissionDenied("not admin".into()),
        );

        h.operations
            .sync_group(&"10-20@g.us".into(), &h.cancel)
            .await
            .unwrap();

        match h.store.get(EntityKind::Group, &"10-20@g.us".into()).await.unwrap() {
            Some(Entity::Group(group)) => assert_eq!(group.invite_link, None),
            other => panic!("expected group, got {other:?}"),
        }
        assert_eq!(
            h.client.calls(),
            vec![
                "group_info:10-20@g.us",
                "group_invite_link:10-20@g.us",
                "profile_picture:10-20@g.us:-",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_group_info_keeps_invite_link() {
        let h = Harness::new();
        let id: EntityId = "10-20@g.us".into();
        h.operations.sync_group(&id, &h.cancel).await.unwrap();

        h.operations.refresh_group_info(&id, &h.cancel).await.unwrap();
        match h.store.get(EntityKind::Group, &id).await.unwrap() {
            Some(Entity::Group(group)) => {
                assert_eq!(group.invite_link.as_deref(), Some("https://invite/10-20@g.us"))
            }
            other => panic!("expected group, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_picture_is_not_rewritten() {
        let h = Harness::new();
        let id: EntityId = "8@s.whatsapp.net".into();

        h.operations.refresh_picture(&id, &h.cancel).await.unwrap();
        let first = h.store.get(EntityKind::ProfilePicture, &id).await.unwrap();
        assert!(first.is_some());

        h.operations.refresh_picture(&id, &h.cancel).await.unwrap();
        let second = h.store.get(EntityKind::ProfilePicture, &id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(
            h.client.calls_to("profile_picture"),
            vec![
                "profile_picture:8@s.whatsapp.net:-",
                "profile_picture:8@s.whatsapp.net:pic-8@s.whatsapp.net",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn chat_is_local_only() {
        let h = Harness::new();
        let intent = SyncIntent {
            target: Some("1-2@g.us".into()),
            kind: IntentKind::EnsureChat,
            trigger: "test",
        };
        h.operations.run_intent(intent, &h.cancel).await.unwrap();

        assert!(h.client.calls().is_empty());
        assert_eq!(h.store.count(EntityKind::Chat).unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn block_list_records_only_successful_attempt() {
        let h = Harness::new();
        h.client.fail_next(
            "block_list",
            FetchError::RateLimited {
                retry_after: Duration::from_secs(10),
            },
        );
        h.client.fail_next(
            "block_list",
            FetchError::RateLimited {
                retry_after: Duration::ZERO,
            },
        );
        h.client.set_block_list(BlockList {
            blocked: vec!["spam@s.whatsapp.net".into()],
        });
        let started = tokio::time::Instant::now();

        for _ in 0..2 {
            assert!(h
                .operations
                .run_category(SyncCategory::BlockList, &h.cancel)
                .await
                .is_err());
            assert!(h
                .operations
                .registry()
                .state(SyncCategory::BlockList)
                .await
                .unwrap()
                .is_none());
        }

        let before_success = Utc::now();
        h.operations
            .run_category(SyncCategory::BlockList, &h.cancel)
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_secs(10));
        let last = h
            .operations
            .registry()
            .get(SyncCategory::BlockList)
            .await
            .unwrap();
        // Stored with millisecond precision.
        assert!(last >= before_success - chrono::Duration::milliseconds(1));
        assert_eq!(h.client.calls_to("block_list").len(), 3);
        assert!(h
            .store
            .exists(EntityKind::BlockList, &"self".into())
            .await
            .unwrap());
    }

    async fn store_contacts(h: &Harness, ids: &[&str]) {
        for id in ids {
            h.store
                .upsert(Entity::Contact(Contact {
                    id: (*id).into(),
                    full_name: None,
                    push_name: None,
                    business_name: None,
                }))
                .await
                .unwrap();
        }
    }

    async fn recorded(h: &Harness, category: SyncCategory) -> bool {
        h.operations
            .registry()
            .state(category)
            .await
            .unwrap()
            .is_some()
    }

    #[tokio::test(start_paused = true)]
    async fn picture_backfill_tolerates_entity_failures() {
        let h = Harness::new();
        store_contacts(&h, &["1@s.whatsapp.net", "2@s.whatsapp.net"]).await;
        h.client
            .fail_next("profile_picture", FetchError::Transient("timeout".into()));

        h.operations
            .run_category(SyncCategory::ContactPictures, &h.cancel)
            .await
            .unwrap();
        assert_eq!(h.store.count(EntityKind::ProfilePicture).unwrap(), 1);
        assert!(h
            .operations
            .registry()
            .state(SyncCategory::ContactPictures)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn picture_backfill_with_no_success_stays_stale() {
        let h = Harness::new();
        store_contacts(&h, &["1@s.whatsapp.net", "2@s.whatsapp.net"]).await;
        for _ in 0..2 {
            h.client
                .fail_next("profile_picture", FetchError::Transient("offline".into()));
        }

        let err = h
            .operations
            .run_category(SyncCategory::ContactPictures, &h.cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FetchError>(),
            Some(FetchError::Transient(_))
        ));
        assert_eq!(h.store.count(EntityKind::ProfilePicture).unwrap(), 0);
        assert!(!recorded(&h, SyncCategory::ContactPictures).await);
    }

    #[tokio::test(start_paused = true)]
    async fn picture_backfill_throttled_stays_stale() {
        let h = Harness::new();
        store_contacts(&h, &["1@s.whatsapp.net", "2@s.whatsapp.net"]).await;
        h.client.fail_next(
            "profile_picture",
            FetchError::RateLimited {
                retry_after: Duration::from_secs(5),
            },
        );

        assert!(h
            .operations
            .run_category(SyncCategory::ContactPictures, &h.cancel)
            .await
            .is_err());
        assert_eq!(h.store.count(EntityKind::ProfilePicture).unwrap(), 1);
        assert!(!recorded(&h, SyncCategory::ContactPictures).await);
    }

    #[tokio::test(start_paused = true)]
    async fn groups_category_treats_denied_list_as_empty() {
        let h = Harness::new();
        h.client.fail_next(
            "joined_groups",
            FetchError::PermissionDenied("no".into()),
        );

        h.operations
            .run_category(SyncCategory::Groups, &h.cancel)
            .await
            .unwrap();
        assert_eq!(h.store.count(EntityKind::Group).unwrap(), 0);
        assert!(recorded(&h, SyncCategory::Groups).await);
    }

    #[tokio::test(start_paused = true)]
    async fn channels_category_treats_missing_list_as_empty() {
        let h = Harness::new();
        h.client
            .fail_next("subscribed_channels", FetchError::NotFound("none".into()));

        h.operations
            .run_category(SyncCategory::Channels, &h.cancel)
            .await
            .unwrap();
        assert_eq!(h.store.count(EntityKind::Channel).unwrap(), 0);
        assert!(recorded(&h, SyncCategory::Channels).await);
    }

    #[tokio::test(start_paused = true)]
    async fn groups_category_stores_under_normalized_id() {
        let h = Harness::new();
        h.normalizer
            .learn("old-1@g.us".into(), "1-1@g.us".into());
        h.client.set_joined_groups(vec![Harness::group("old-1@g.us")]);

        h.operations
            .run_category(SyncCategory::Groups, &h.cancel)
            .await
            .unwrap();
        assert_eq!(
            h.store.list_ids(EntityKind::Group).await.unwrap(),
            vec![EntityId::from("1-1@g.us")]
        );
        assert_eq!(
            h.client.calls_to("group_invite_link"),
            vec!["group_invite_link:1-1@g.us"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn groups_category_stores_joined_groups() {
        let h = Harness::new();
        h.client.set_joined_groups(vec![
            Harness::group("1-1@g.us"),
            Harness::group("2-2@g.us"),
        ]);

        h.operations
            .run_category(SyncCategory::Groups, &h.cancel)
            .await
            .unwrap();
        assert_eq!(
            h.store.list_ids(EntityKind::Group).await.unwrap(),
            vec![EntityId::from("1-1@g.us"), EntityId::from("2-2@g.us")]
        );
        assert_eq!(h.client.calls_to("group_invite_link").len(), 2);
        assert!(h.client.calls_to("group_info").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_caller_gets_cancelled() {
        let h = Harness::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = h
            .operations
            .run_intent(ensure_contact("9@s.whatsapp.net"), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.downcast_ref::<FetchError>(), Some(&FetchError::Cancelled));
    }
}
