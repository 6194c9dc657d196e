//! Chain Store
//!
//! Append-only persistence for audit entries. The store owns sequence
//! assignment and guarantees that an append only lands on top of the tail
//! it was computed against.

pub mod models;
pub mod schema;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::audit::entry::{AuditEntry, ChainHash, EntryFields, GENESIS};
use crate::error::AuditResult;

pub use sqlite::SqliteChainStore;

/// Most recently appended entry's position and hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainTail {
    pub sequence_id: i64,
    pub entry_hash: ChainHash,
}

/// A fully hashed entry waiting to be persisted.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub fields: EntryFields,
    pub prev_hash: ChainHash,
    pub entry_hash: ChainHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Oldest first, used by verification.
    Ascending,
    /// Newest first, used for display.
    Descending,
}

/// One page of a range query.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPage {
    pub entries: Vec<AuditEntry>,
    /// Cursor for the next page, present only when more entries exist.
    pub next_cursor: Option<i64>,
}

/// An entry that is stored but cannot be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadableEntry {
    pub sequence_id: i64,
    pub reason: String,
}

/// One ascending page for verification.
///
/// Decoding stops at the first unreadable row: `entries` holds every row
/// before it and `unreadable` describes it.
#[derive(Debug, Clone)]
pub struct ScanPage {
    pub entries: Vec<AuditEntry>,
    pub unreadable: Option<UnreadableEntry>,
    pub next_cursor: Option<i64>,
}

#[async_trait]
pub trait ChainStore: Send + Sync {
    /// Position and hash of the newest entry, if any.
    async fn tail(&self) -> AuditResult<Option<ChainTail>>;

    /// Hash the next entry must link to.
    async fn tail_hash(&self) -> AuditResult<ChainHash> {
        Ok(self.tail().await?.map(|t| t.entry_hash).unwrap_or(GENESIS))
    }

    /// Persist `entry` as the new tail.
    ///
    /// Fails with `ConcurrentAppendConflict` when the stored tail no longer
    /// matches `entry.prev_hash`; nothing is written in that case.
    async fn append(&self, entry: NewEntry) -> AuditResult<AuditEntry>;

    /// Entries strictly after `cursor` in the given order, at most `limit`.
    async fn range(&self, cursor: Option<i64>, limit: u32, order: Order)
        -> AuditResult<EntryPage>;

    /// Entries strictly after `cursor`, oldest first, keeping the readable
    /// prefix of a page that contains an undecodable row.
    async fn scan(&self, cursor: Option<i64>, limit: u32) -> AuditResult<ScanPage>;

    /// Entries targeting one object, newest first.
    async fn entries_for_object(
        &self,
        object_type: &str,
        object_id: &str,
        cursor: Option<i64>,
        limit: u32,
    ) -> AuditResult<EntryPage>;

    async fn count(&self) -> AuditResult<u64>;
}
