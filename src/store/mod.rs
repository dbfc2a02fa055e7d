//! Persistence implementations for the mirror.

pub mod sqlite;

pub use sqlite::SqliteDirectoryStore;
