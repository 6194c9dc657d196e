//! Audit Writer
//!
//! Appends entries to the chain. Reading the tail, hashing against it and
//! appending form one critical section per chain: an in-process append lock
//! serializes local writers, and the store's compare-and-append rejects
//! entries computed against a stale tail (another process won the race),
//! which are then recomputed and retried.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::audit::canonical::hash_entry;
use crate::audit::entry::{ActorContext, AuditEntry, EntryFields, EventFields};
use crate::database::{ChainStore, NewEntry};
use crate::error::{AuditError, AuditResult};

pub const DEFAULT_APPEND_RETRY_LIMIT: u32 = 5;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(5);

/// Writer appending hash-linked entries to a chain store
#[derive(Clone)]
pub struct AuditWriter {
    store: Arc<dyn ChainStore>,
    append_lock: Arc<Mutex<()>>,
    retry_limit: u32,
}

impl AuditWriter {
    pub fn new(store: Arc<dyn ChainStore>) -> Self {
        Self::with_retry_limit(store, DEFAULT_APPEND_RETRY_LIMIT)
    }

    pub fn with_retry_limit(store: Arc<dyn ChainStore>, retry_limit: u32) -> Self {
        Self {
            store,
            append_lock: Arc::new(Mutex::new(())),
            retry_limit: retry_limit.max(1),
        }
    }

    /// Record one governed action.
    ///
    /// Returns only after the entry is durably part of the chain. Any
    /// failure is returned to the caller, which decides whether the
    /// governed action may proceed without its audit record.
    pub async fn write(&self, actor: ActorContext, event: EventFields) -> AuditResult<AuditEntry> {
        actor.validate()?;
        event.validate()?;

        let _guard = self.append_lock.lock().await;
        let mut last_conflict = None;

        for attempt in 0..self.retry_limit {
            if attempt > 0 {
                tokio::time::sleep(RETRY_BASE_DELAY * (1u32 << attempt.min(6))).await;
            }

            let prev_hash = self.store.tail_hash().await?;
            let fields = EntryFields::stamp(actor.clone(), event.clone());
            let entry_hash = hash_entry(&fields, &prev_hash)?;

            match self
                .store
                .append(NewEntry {
                    fields,
                    prev_hash,
                    entry_hash,
                })
                .await
            {
                Ok(entry) => {
                    info!(
                        sequence_id = entry.sequence_id,
                        action = %entry.action(),
                        entry_hash = %entry.entry_hash,
                        "Appended audit entry"
                    );
                    debug!("Audit entry: {}", entry.summary());
                    return Ok(entry);
                }
                Err(err) if err.is_conflict() => {
                    warn!(
                        attempt = attempt + 1,
                        prev_hash = %prev_hash,
                        "Audit chain tail moved during append, retrying: {}",
                        err
                    );
                    last_conflict = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(AuditError::StoreUnavailable(format!(
            "audit append failed after {} attempts: {}",
            self.retry_limit,
            last_conflict
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        )))
    }

    pub fn store(&self) -> &Arc<dyn ChainStore> {
        &self.store
    }
}
