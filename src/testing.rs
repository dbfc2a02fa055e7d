//! Test doubles shared by the unit tests.

use crate::config::QueueConfig;
use crate::directory::models::{
    BlockList, Channel, Contact, EntityId, Group, PictureFetch, PrivacySettings, ProfilePicture,
    SyncState,
};
use crate::directory::normalizer::AliasNormalizer;
use crate::directory::traits::{DirectoryClient, FetchError, SyncStateStore};
use crate::store::SqliteDirectoryStore;
use crate::sync::operations::SyncOperations;
use crate::sync::queue::FetchQueue;
use crate::sync::state::SyncStateRegistry;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// ── Remote client ───────────────────────────────────────────────

/// Scripted remote. Records every call as `op:id[:extra]`; answers from
/// canned data unless an error was queued with [`fail_next`](Self::fail_next).
#[derive(Default)]
pub(crate) struct FakeDirectoryClient {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<&'static str, VecDeque<FetchError>>>,
    joined_groups: Mutex<Vec<Group>>,
    channels: Mutex<Vec<Channel>>,
    block_list: Mutex<BlockList>,
    privacy: Mutex<PrivacySettings>,
}

impl FakeDirectoryClient {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, op: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.split(':').next() == Some(op))
            .cloned()
            .collect()
    }

    /// Fail the next call to `op` with `error`. Queued errors are consumed in order.
    pub fn fail_next(&self, op: &'static str, error: FetchError) {
        self.failures.lock().entry(op).or_default().push_back(error);
    }

    pub fn set_joined_groups(&self, groups: Vec<Group>) {
        *self.joined_groups.lock() = groups;
    }

    pub fn set_channels(&self, channels: Vec<Channel>) {
        *self.channels.lock() = channels;
    }

    pub fn set_block_list(&self, list: BlockList) {
        *self.block_list.lock() = list;
    }

    fn call(&self, op: &'static str, record: String) -> Result<(), FetchError> {
        self.calls.lock().push(record);
        match self.failures.lock().get_mut(op).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DirectoryClient for FakeDirectoryClient {
    async fn fetch_contact_info(&self, id: &EntityId) -> Result<Contact, FetchError> {
        self.call("contact_info", format!("contact_info:{id}"))?;
        Ok(Contact {
            id: id.clone(),
            full_name: Some(format!("Contact {}", id.user())),
            push_name: None,
            business_name: None,
        })
    }

    async fn fetch_group_info(&self, id: &EntityId) -> Result<Group, FetchError> {
        self.call("group_info", format!("group_info:{id}"))?;
        Ok(Harness::group(id.as_str()))
    }

    async fn fetch_group_invite_link(&self, id: &EntityId) -> Result<String, FetchError> {
        self.call("group_invite_link", format!("group_invite_link:{id}"))?;
        Ok(format!("https://invite/{id}"))
    }

    async fn fetch_joined_groups(&self) -> Result<Vec<Group>, FetchError> {
        self.call("joined_groups", "joined_groups".into())?;
        Ok(self.joined_groups.lock().clone())
    }

    async fn fetch_channel_info(&self, id: &EntityId) -> Result<Channel, FetchError> {
        self.call("channel_info", format!("channel_info:{id}"))?;
        Ok(Channel {
            id: id.clone(),
            name: format!("Channel {}", id.user()),
            description: None,
            subscriber_count: Some(1),
        })
    }

    async fn fetch_subscribed_channels(&self) -> Result<Vec<Channel>, FetchError> {
        self.call("subscribed_channels", "subscribed_channels".into())?;
        Ok(self.channels.lock().clone())
    }

    async fn fetch_profile_picture(
        &self,
        id: &EntityId,
        known_picture_id: Option<&str>,
    ) -> Result<PictureFetch, FetchError> {
        self.call(
            "profile_picture",
            format!("profile_picture:{id}:{}", known_picture_id.unwrap_or("-")),
        )?;
        let current = format!("pic-{id}");
        if known_picture_id == Some(current.as_str()) {
            return Ok(PictureFetch::Unchanged);
        }
        Ok(PictureFetch::Updated(ProfilePicture {
            owner: id.clone(),
            url: Some(format!("https://pictures/{current}")),
            picture_id: Some(current),
            fetched_at: Utc::now(),
        }))
    }

    async fn fetch_block_list(&self) -> Result<BlockList, FetchError> {
        self.call("block_list", "block_list".into())?;
        Ok(self.block_list.lock().clone())
    }

    async fn fetch_privacy_settings(&self) -> Result<PrivacySettings, FetchError> {
        self.call("privacy_settings", "privacy_settings".into())?;
        Ok(self.privacy.lock().clone())
    }
}

// ── Sync state ──────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct MemoryStateStore {
    states: Mutex<HashMap<String, SyncState>>,
}

#[async_trait]
impl SyncStateStore for MemoryStateStore {
    async fn get_sync_state(&self, category: &str) -> anyhow::Result<Option<SyncState>> {
        Ok(self.states.lock().get(category).cloned())
    }

    async fn put_sync_state(&self, state: SyncState) -> anyhow::Result<()> {
        let mut states = self.states.lock();
        match states.get_mut(&state.category) {
            Some(existing) => {
                if state.last_sync_at >= existing.last_sync_at {
                    *existing = state;
                }
            }
            None => {
                states.insert(state.category.clone(), state);
            }
        }
        Ok(())
    }
}

// ── Wiring ──────────────────────────────────────────────────────

/// Operations over an in-memory SQLite store and the fake remote, with a
/// queue that has no courtesy delay. Must be built inside a runtime.
pub(crate) struct Harness {
    pub client: Arc<FakeDirectoryClient>,
    pub store: Arc<SqliteDirectoryStore>,
    pub normalizer: Arc<AliasNormalizer>,
    pub operations: Arc<SyncOperations>,
    pub cancel: CancellationToken,
}

impl Harness {
    pub fn new() -> Self {
        let client = Arc::new(FakeDirectoryClient::default());
        let store = Arc::new(SqliteDirectoryStore::open_in_memory().unwrap());
        let normalizer = Arc::new(AliasNormalizer::new());
        let cancel = CancellationToken::new();

        let (queue, _worker) = FetchQueue::spawn(
            &QueueConfig {
                min_delay_ms: 0,
                capacity: 64,
            },
            cancel.clone(),
        );
        let operations = Arc::new(SyncOperations::new(
            client.clone(),
            store.clone(),
            normalizer.clone(),
            queue,
            SyncStateRegistry::new(store.clone()),
        ));

        Self {
            client,
            store,
            normalizer,
            operations,
            cancel,
        }
    }

    pub fn group(id: &str) -> Group {
        Group {
            id: id.into(),
            name: format!("Group {id}"),
            topic: None,
            participants: Vec::new(),
            invite_link: None,
        }
    }
}
