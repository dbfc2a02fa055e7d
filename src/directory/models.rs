use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Server part used by group chat identifiers.
pub const GROUP_SERVER: &str = "g.us";

/// Server part used by broadcast channel identifiers.
pub const CHANNEL_SERVER: &str = "newsletter";

// ── Identifiers ─────────────────────────────────────────────────

/// A directory identifier of the form `user@server`.
///
/// Raw identifiers arriving with events may be aliases of one another;
/// the engine always runs them through an
/// [`IdentifierNormalizer`](super::IdentifierNormalizer) before touching
/// the repository or the remote.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part after `@`, empty if there is none.
    pub fn server(&self) -> &str {
        self.0.split_once('@').map(|(_, s)| s).unwrap_or_default()
    }

    /// The part before `@` (the whole id if there is no `@`).
    pub fn user(&self) -> &str {
        self.0.split_once('@').map(|(u, _)| u).unwrap_or(&self.0)
    }

    /// What kind of chat this identifier addresses, derived from the server part.
    pub fn kind_hint(&self) -> ChatKind {
        match self.server() {
            GROUP_SERVER => ChatKind::Group,
            CHANNEL_SERVER => ChatKind::Channel,
            _ => ChatKind::Direct,
        }
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

// ── Categories ──────────────────────────────────────────────────

/// A named class of remote data with its own last-sync bookkeeping.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum SyncCategory {
    Contacts,
    Chats,
    Groups,
    Channels,
    BlockList,
    Privacy,
    ContactPictures,
    GroupPictures,
    ChannelPictures,
}

impl SyncCategory {
    pub const ALL: [SyncCategory; 9] = [
        Self::Contacts,
        Self::Chats,
        Self::Groups,
        Self::Channels,
        Self::BlockList,
        Self::Privacy,
        Self::ContactPictures,
        Self::GroupPictures,
        Self::ChannelPictures,
    ];

    /// Key under which the category's [`SyncState`] is stored.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Contacts => "contacts",
            Self::Chats => "chats",
            Self::Groups => "groups",
            Self::Channels => "channels",
            Self::BlockList => "blocklist",
            Self::Privacy => "privacy",
            Self::ContactPictures => "contact_pictures",
            Self::GroupPictures => "group_pictures",
            Self::ChannelPictures => "channel_pictures",
        }
    }
}

impl std::fmt::Display for SyncCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last successful completion of a category.
///
/// One record per category, overwritten on every completion and never
/// moved backwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub category: String,
    pub last_sync_at: DateTime<Utc>,
    /// Opaque resume marker for categories that sync incrementally.
    #[serde(default)]
    pub progress_marker: Option<Vec<u8>>,
}

impl SyncState {
    pub fn new(category: SyncCategory, last_sync_at: DateTime<Utc>) -> Self {
        Self {
            category: category.as_str().to_string(),
            last_sync_at,
            progress_marker: None,
        }
    }
}

// ── Entities ────────────────────────────────────────────────────

/// Discriminant used by existence checks and listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Contact,
    Group,
    Channel,
    Chat,
    ProfilePicture,
    BlockList,
    PrivacySettings,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Contact => "contact",
            Self::Group => "group",
            Self::Channel => "channel",
            Self::Chat => "chat",
            Self::ProfilePicture => "profile_picture",
            Self::BlockList => "block_list",
            Self::PrivacySettings => "privacy_settings",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Direct,
    Group,
    Channel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: EntityId,
    #[serde(default)]
    pub full_name: Option<String>,
    /// Name the contact chose for themselves.
    #[serde(default)]
    pub push_name: Option<String>,
    #[serde(default)]
    pub business_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub participants: Vec<EntityId>,
    /// `None` when we lack the permission to see it.
    #[serde(default)]
    pub invite_link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub subscriber_count: Option<u64>,
}

/// Local chat record; created on first sight, never fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: EntityId,
    pub kind: ChatKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePicture {
    pub owner: EntityId,
    /// `None` once the owner removed their picture.
    #[serde(default)]
    pub picture_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockList {
    pub blocked: Vec<EntityId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacySettings {
    /// Setting name → visibility value (e.g. `last_seen` → `contacts`).
    pub settings: BTreeMap<String, String>,
}

/// Outcome of a profile-picture fetch given the picture id we already hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PictureFetch {
    Unchanged,
    Removed,
    Updated(ProfilePicture),
}

/// Anything the repository stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Contact(Contact),
    Group(Group),
    Channel(Channel),
    Chat(Chat),
    ProfilePicture(ProfilePicture),
    BlockList(BlockList),
    PrivacySettings(PrivacySettings),
}

/// Row id used for account-wide singletons (block list, privacy settings).
pub const SELF_ROW_ID: &str = "self";

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Contact(_) => EntityKind::Contact,
            Self::Group(_) => EntityKind::Group,
            Self::Channel(_) => EntityKind::Channel,
            Self::Chat(_) => EntityKind::Chat,
            Self::ProfilePicture(_) => EntityKind::ProfilePicture,
            Self::BlockList(_) => EntityKind::BlockList,
            Self::PrivacySettings(_) => EntityKind::PrivacySettings,
        }
    }

    /// Storage key within [`Entity::kind`].
    pub fn id(&self) -> EntityId {
        match self {
            Self::Contact(c) => c.id.clone(),
            Self::Group(g) => g.id.clone(),
            Self::Channel(c) => c.id.clone(),
            Self::Chat(c) => c.id.clone(),
            Self::ProfilePicture(p) => p.owner.clone(),
            Self::BlockList(_) | Self::PrivacySettings(_) => EntityId::new(SELF_ROW_ID),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_hint_follows_server_part() {
        assert_eq!(EntityId::from("123@s.whatsapp.net").kind_hint(), ChatKind::Direct);
        assert_eq!(EntityId::from("123-456@g.us").kind_hint(), ChatKind::Group);
        assert_eq!(EntityId::from("987@newsletter").kind_hint(), ChatKind::Channel);
        assert_eq!(EntityId::from("no-server").kind_hint(), ChatKind::Direct);
    }

    #[test]
    fn user_and_server_split() {
        let id = EntityId::from("alice@example.org");
        assert_eq!(id.user(), "alice");
        assert_eq!(id.server(), "example.org");

        let bare = EntityId::from("bare");
        assert_eq!(bare.user(), "bare");
        assert_eq!(bare.server(), "");
    }

    #[test]
    fn category_keys_are_unique() {
        let mut keys: Vec<&str> = SyncCategory::ALL.iter().map(|c| c.as_str()).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), SyncCategory::ALL.len());
    }

    #[test]
    fn singleton_entities_share_self_row() {
        let block = Entity::BlockList(BlockList::default());
        let privacy = Entity::PrivacySettings(PrivacySettings::default());
        assert_eq!(block.id().as_str(), SELF_ROW_ID);
        assert_eq!(privacy.id().as_str(), SELF_ROW_ID);
        assert_ne!(block.kind(), privacy.kind());
    }

    #[test]
    fn entity_serializes_with_kind_tag() {
        let entity = Entity::Contact(Contact {
            id: "bob@s.whatsapp.net".into(),
            full_name: Some("Bob".into()),
            push_name: None,
            business_name: None,
        });
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["kind"], "contact");
        assert_eq!(json["id"], "bob@s.whatsapp.net");
    }
}
