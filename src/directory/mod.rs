//! Directory data model and the collaborator seams the sync engine calls.
//!
//! - [`models`]: identifiers, entity records and sync categories
//! - [`traits`]: remote client, persistence repository, sync-state store
//! - [`normalizer`]: identifier normalization (alias → canonical id)

pub mod models;
pub mod normalizer;
pub mod traits;

#[allow(unused_imports)]
pub use models::{
    BlockList, Channel, Chat, ChatKind, Contact, Entity, EntityId, EntityKind, Group,
    PictureFetch, PrivacySettings, ProfilePicture, SyncCategory, SyncState,
};
#[allow(unused_imports)]
pub use normalizer::{AliasNormalizer, IdentifierNormalizer, PassthroughNormalizer};
#[allow(unused_imports)]
pub use traits::{DirectoryClient, DirectoryRepository, FetchError, SyncStateStore};
