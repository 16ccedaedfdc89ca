//! # forgor-store
//!
//! Storage abstraction for the forgor-sync coordination server. The [`Store`]
//! trait carries the point lookups validators need plus transactional
//! `apply_*` methods that make each head advance atomic with the read that
//! authorized it: within one vault, the (head-read, insert, head-upsert)
//! triple runs inside a single `BEGIN IMMEDIATE` transaction and the head is
//! re-checked inside it, so a losing racer fails its chain check instead of
//! corrupting a head.
//!
//! Two implementations: [`SqliteStore`] (rusqlite with bundled SQLite, each
//! call crossing into `spawn_blocking`) and [`MemoryStore`] for tests.

pub mod error;
pub mod memory;
pub mod migration;
pub mod rows;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use rows::{
    DeviceRow, EventHead, EventRow, InviteClaimRow, InviteRow, KeyUpdateAckRow, KeyUpdateRow,
    MemberEventRow, MembershipHead, NonceKind, SnapshotRow, VaultMemberRow, VaultRow,
};
pub use sqlite::SqliteStore;
pub use traits::Store;

/// Current UTC time as an RFC 3339 string, the `created_at` stamp format.
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now()
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
