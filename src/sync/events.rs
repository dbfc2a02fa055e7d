use crate::directory::models::EntityId;
use serde::{Deserialize, Serialize};

/// Domain events delivered by the upstream connection.
///
/// Identifiers are raw: they are normalized by the engine before any
/// existence check or fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DirectoryEvent {
    /// A new message in any chat.
    Message {
        chat: EntityId,
        sender: EntityId,
        #[serde(default)]
        from_me: bool,
    },
    PictureChanged {
        entity: EntityId,
    },
    /// The account was added to a group.
    JoinedGroup {
        group: EntityId,
    },
    GroupParticipantsChanged {
        group: EntityId,
        #[serde(default)]
        joined: Vec<EntityId>,
        #[serde(default)]
        left: Vec<EntityId>,
    },
    /// Subject, topic or settings of a group changed.
    GroupInfoChanged {
        group: EntityId,
    },
    IncomingCall {
        caller: EntityId,
    },
    BlockListChanged,
    PrivacySettingsChanged,
    PushNameChanged {
        contact: EntityId,
    },
    ChannelJoined {
        channel: EntityId,
    },
    /// Bulk replay of past conversations after pairing.
    HistorySync {
        #[serde(default)]
        contacts: Vec<EntityId>,
        #[serde(default)]
        groups: Vec<EntityId>,
    },
}

impl DirectoryEvent {
    /// Stable event name, carried as the trigger of every intent it fans out to.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::PictureChanged { .. } => "picture_changed",
            Self::JoinedGroup { .. } => "joined_group",
            Self::GroupParticipantsChanged { .. } => "group_participants_changed",
            Self::GroupInfoChanged { .. } => "group_info_changed",
            Self::IncomingCall { .. } => "incoming_call",
            Self::BlockListChanged => "block_list_changed",
            Self::PrivacySettingsChanged => "privacy_settings_changed",
            Self::PushNameChanged { .. } => "push_name_changed",
            Self::ChannelJoined { .. } => "channel_joined",
            Self::HistorySync { .. } => "history_sync",
        }
    }
}
