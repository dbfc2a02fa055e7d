//! Synchronization engine for a local mirror of remote directory data
//! (contacts, groups, channels, block list, privacy settings).
//!
//! Two forces keep the mirror fresh:
//!
//! - **Events**: [`sync::CoalescenceDispatcher`] turns each upstream
//!   [`sync::DirectoryEvent`] into existence-guarded sync intents.
//! - **Time**: [`sync::PeriodicScheduler`] re-verifies whole categories on
//!   fixed intervals, gated by the persisted [`sync::SyncStateRegistry`].
//!
//! Every remote call funnels through the single [`sync::FetchQueue`] worker,
//! which enforces a courtesy delay between calls and honours `retry after`
//! hints from the remote.
//!
//! The remote client, the identifier normalizer and the persistence layer are
//! collaborators described in [`directory`]; [`store`] ships a SQLite
//! implementation of the persistence side.

pub mod config;
pub mod directory;
pub mod logging;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use sync::SyncEngine;
