//! Fan-out table: which sync intents each event implies.
//!
//! Pure routing. Nothing here touches the repository or the remote; the
//! dispatcher runs each intent as its own supervised task.

use super::events::DirectoryEvent;
use crate::directory::models::{ChatKind, EntityId, EntityKind, SyncCategory};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntentKind {
    /// Full contact sync unless the contact is already known.
    EnsureContact,
    /// Local chat record unless one exists. Never hits the remote.
    EnsureChat,
    /// Full group sync unless the group is already known.
    EnsureGroup,
    /// Full channel sync unless the channel is already known.
    EnsureChannel,
    /// Unconditional full group sync: roster, invite link, picture.
    SyncGroup,
    /// Unconditional group metadata refresh.
    RefreshGroupInfo,
    /// Unconditional channel sync: info and picture.
    SyncChannel,
    /// Re-fetch the target's profile picture only.
    RefreshPicture,
    RefreshBlockList,
    RefreshPrivacy,
}

impl IntentKind {
    /// Entity kind checked by the existence guard, for guarded intents.
    pub fn guard(self) -> Option<EntityKind> {
        match self {
            Self::EnsureContact => Some(EntityKind::Contact),
            Self::EnsureChat => Some(EntityKind::Chat),
            Self::EnsureGroup => Some(EntityKind::Group),
            Self::EnsureChannel => Some(EntityKind::Channel),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::EnsureContact => "ensure_contact",
            Self::EnsureChat => "ensure_chat",
            Self::EnsureGroup => "ensure_group",
            Self::EnsureChannel => "ensure_channel",
            Self::SyncGroup => "sync_group",
            Self::RefreshGroupInfo => "refresh_group_info",
            Self::SyncChannel => "sync_channel",
            Self::RefreshPicture => "refresh_picture",
            Self::RefreshBlockList => "refresh_block_list",
            Self::RefreshPrivacy => "refresh_privacy",
        }
    }
}

/// An ephemeral unit of work derived from one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncIntent {
    /// `None` for account-wide intents (block list, privacy).
    pub target: Option<EntityId>,
    pub kind: IntentKind,
    /// Name of the event that produced this intent.
    pub trigger: &'static str,
}

impl SyncIntent {
    fn targeted(kind: IntentKind, target: &EntityId, trigger: &'static str) -> Self {
        Self {
            target: Some(target.clone()),
            kind,
            trigger,
        }
    }

    fn global(kind: IntentKind, trigger: &'static str) -> Self {
        Self {
            target: None,
            kind,
            trigger,
        }
    }

    pub fn category(&self) -> SyncCategory {
        match self.kind {
            IntentKind::EnsureContact => SyncCategory::Contacts,
            IntentKind::EnsureChat => SyncCategory::Chats,
            IntentKind::EnsureGroup | IntentKind::SyncGroup | IntentKind::RefreshGroupInfo => {
                SyncCategory::Groups
            }
            IntentKind::EnsureChannel | IntentKind::SyncChannel => SyncCategory::Channels,
            IntentKind::RefreshPicture => match self.target.as_ref().map(EntityId::kind_hint) {
                Some(ChatKind::Group) => SyncCategory::GroupPictures,
                Some(ChatKind::Channel) => SyncCategory::ChannelPictures,
                _ => SyncCategory::ContactPictures,
            },
            IntentKind::RefreshBlockList => SyncCategory::BlockList,
            IntentKind::RefreshPrivacy => SyncCategory::Privacy,
        }
    }

    /// Short label for logs and task names, e.g. `ensure_contact:123@s.whatsapp.net`.
    pub fn label(&self) -> String {
        match &self.target {
            Some(target) => format!("{}:{target}", self.kind.as_str()),
            None => self.kind.as_str().to_string(),
        }
    }
}

/// Map one event to the intents it implies.
pub fn fan_out(event: &DirectoryEvent) -> Vec<SyncIntent> {
    use IntentKind::*;
    let trigger = event.name();

    match event {
        DirectoryEvent::Message {
            chat,
            sender,
            from_me,
        } => match chat.kind_hint() {
            // Channel posts carry no useful sender.
            ChatKind::Channel => vec![
                SyncIntent::targeted(EnsureChannel, chat, trigger),
                SyncIntent::targeted(EnsureChat, chat, trigger),
            ],
            kind => {
                let mut intents = Vec::with_capacity(3);
                if !from_me {
                    intents.push(SyncIntent::targeted(EnsureContact, sender, trigger));
                }
                intents.push(SyncIntent::targeted(EnsureChat, chat, trigger));
                if kind == ChatKind::Group {
                    intents.push(SyncIntent::targeted(EnsureGroup, chat, trigger));
                }
                intents
            }
        },
        DirectoryEvent::PictureChanged { entity } => {
            vec![SyncIntent::targeted(RefreshPicture, entity, trigger)]
        }
        DirectoryEvent::JoinedGroup { group } => {
            vec![SyncIntent::targeted(SyncGroup, group, trigger)]
        }
        DirectoryEvent::GroupParticipantsChanged { group, joined, .. } => {
            let mut intents = vec![SyncIntent::targeted(RefreshGroupInfo, group, trigger)];
            let mut seen = BTreeSet::new();
            for member in joined {
                if seen.insert(member) {
                    intents.push(SyncIntent::targeted(EnsureContact, member, trigger));
                }
            }
            intents
        }
        DirectoryEvent::GroupInfoChanged { group } => {
            vec![SyncIntent::targeted(RefreshGroupInfo, group, trigger)]
        }
        DirectoryEvent::IncomingCall { caller } => {
            vec![SyncIntent::targeted(EnsureContact, caller, trigger)]
        }
        DirectoryEvent::BlockListChanged => vec![SyncIntent::global(RefreshBlockList, trigger)],
        DirectoryEvent::PrivacySettingsChanged => vec![SyncIntent::global(RefreshPrivacy, trigger)],
        DirectoryEvent::PushNameChanged { contact } => {
            vec![SyncIntent::targeted(EnsureContact, contact, trigger)]
        }
        DirectoryEvent::ChannelJoined { channel } => {
            vec![SyncIntent::targeted(SyncChannel, channel, trigger)]
        }
        DirectoryEvent::HistorySync { contacts, groups } => {
            let contacts: BTreeSet<&EntityId> = contacts.iter().collect();
            let groups: BTreeSet<&EntityId> = groups.iter().collect();
            contacts
                .into_iter()
                .map(|c| SyncIntent::targeted(EnsureContact, c, trigger))
                .chain(
                    groups
                        .into_iter()
                        .map(|g| SyncIntent::targeted(SyncGroup, g, trigger)),
                )
                .collect()
        }
    }
}
