//! Audit Chain Verification
//!
//! Walks the chain in sequence order, recomputing every hash and checking
//! every link. A broken chain is a normal result, not an error: errors are
//! reserved for the cases where the chain could not be read at all.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::audit::canonical::hash_entry;
use crate::audit::entry::{AuditEntry, ChainHash, GENESIS};
use crate::database::ChainStore;
use crate::error::{AuditError, AuditResult};

pub const DEFAULT_VERIFY_PAGE_SIZE: u32 = 500;

/// Divergences reported beyond this are counted but not described.
pub const MAX_REPORTED_ERRORS: usize = 100;

/// Last entry a verification pass found intact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub sequence_id: i64,
    pub entry_hash: ChainHash,
    /// Entries verified up to and including `sequence_id`.
    pub entries_verified: u64,
}

/// Outcome of a verification pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub valid: bool,
    pub total_entries: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broken_at_sequence_id: Option<i64>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Resume point: the newest entry before the first divergence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Checkpoint>,
    /// False when the pass stopped early on an entry budget.
    pub complete: bool,
    pub verified_at: DateTime<Utc>,
}

impl VerificationReport {
    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        match (self.valid, self.complete) {
            (true, true) => format!("Audit chain is valid ({} entries)", self.total_entries),
            (true, false) => format!(
                "Audit chain intact so far ({} entries checked, pass incomplete)",
                self.total_entries
            ),
            (false, _) => format!(
                "Audit chain is BROKEN at entry {} ({} entries checked): {}",
                self.broken_at_sequence_id.unwrap_or_default(),
                self.total_entries,
                self.errors.first().map(String::as_str).unwrap_or("unknown error")
            ),
        }
    }
}

/// Verifier walking a chain store
#[derive(Clone)]
pub struct ChainVerifier {
    store: Arc<dyn ChainStore>,
    page_size: u32,
}

impl ChainVerifier {
    pub fn new(store: Arc<dyn ChainStore>) -> Self {
        Self::with_page_size(store, DEFAULT_VERIFY_PAGE_SIZE)
    }

    pub fn with_page_size(store: Arc<dyn ChainStore>, page_size: u32) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    /// Verify the whole chain, or everything after `from` when resuming
    /// from a trusted checkpoint.
    pub async fn verify(&self, from: Option<Checkpoint>) -> AuditResult<VerificationReport> {
        self.verify_bounded(from, None).await
    }

    /// Verify at most `max_entries` entries after `from`.
    ///
    /// A report with `complete == false` is progress, not a verdict: resume
    /// from its checkpoint to finish the pass.
    pub async fn verify_bounded(
        &self,
        from: Option<Checkpoint>,
        max_entries: Option<u64>,
    ) -> AuditResult<VerificationReport> {
        // entries appended after this point are outside the pass
        let snapshot_end = match self.store.tail().await? {
            Some(tail) => tail.sequence_id,
            None => 0,
        };

        let mut walk = ChainWalk::new(from);
        let mut cursor = from.map(|c| c.sequence_id);
        let mut scanned: u64 = 0;
        let mut complete = true;

        'pages: loop {
            if cursor.unwrap_or(0) >= snapshot_end {
                break;
            }

            let page = match self.store.scan(cursor, self.page_size).await {
                Ok(page) => page,
                Err(AuditError::CorruptEntry {
                    sequence_id,
                    reason,
                }) => {
                    walk.record_unreadable(sequence_id, &reason);
                    break;
                }
                Err(err) => return Err(err),
            };
            if page.entries.is_empty() && page.unreadable.is_none() {
                break;
            }
            debug!(
                "Verifying {} entries after {:?}",
                page.entries.len(),
                cursor
            );

            for entry in &page.entries {
                if entry.sequence_id > snapshot_end {
                    break 'pages;
                }
                if max_entries.is_some_and(|max| scanned >= max) {
                    complete = false;
                    break 'pages;
                }
                walk.check(entry)?;
                scanned += 1;
                cursor = Some(entry.sequence_id);
            }

            // readable entries before it are checked first so earlier breaks still lead
            if let Some(unreadable) = &page.unreadable {
                if unreadable.sequence_id <= snapshot_end {
                    if max_entries.is_some_and(|max| scanned >= max) {
                        complete = false;
                    } else {
                        walk.record_unreadable(unreadable.sequence_id, &unreadable.reason);
                    }
                }
                break;
            }

            if page.next_cursor.is_none() {
                break;
            }
        }

        let report = walk.finish(complete);
        if report.valid {
            info!("{}", report.summary());
        } else {
            warn!("{}", report.summary());
        }
        Ok(report)
    }
}

/// Running state of one pass over the chain.
struct ChainWalk {
    expected_prev: ChainHash,
    expected_seq: i64,
    last_timestamp: Option<DateTime<Utc>>,
    examined: u64,
    broken_at: Option<i64>,
    checkpoint: Option<Checkpoint>,
    errors: Vec<String>,
    suppressed_errors: usize,
    warnings: Vec<String>,
}

impl ChainWalk {
    fn new(from: Option<Checkpoint>) -> Self {
        match from {
            Some(cp) => Self {
                expected_prev: cp.entry_hash,
                expected_seq: cp.sequence_id + 1,
                last_timestamp: None,
                examined: cp.entries_verified,
                broken_at: None,
                checkpoint: Some(cp),
                errors: Vec::new(),
                suppressed_errors: 0,
                warnings: Vec::new(),
            },
            None => Self {
                expected_prev: GENESIS,
                expected_seq: 1,
                last_timestamp: None,
                examined: 0,
                broken_at: None,
                checkpoint: None,
                errors: Vec::new(),
                suppressed_errors: 0,
                warnings: Vec::new(),
            },
        }
    }

    fn check(&mut self, entry: &AuditEntry) -> AuditResult<()> {
        let seq = entry.sequence_id;
        let mut diverged = false;

        if seq != self.expected_seq {
            diverged = true;
            self.push_error(format!(
                "Sequence gap at entry {}: expected sequence {}",
                seq, self.expected_seq
            ));
        }

        if entry.prev_hash != self.expected_prev {
            diverged = true;
            self.push_error(format!(
                "Hash chain broken at entry {}: expected prev_hash {}, got {}",
                seq, self.expected_prev, entry.prev_hash
            ));
        }

        match hash_entry(&entry.fields, &entry.prev_hash) {
            Ok(recomputed) if recomputed == entry.entry_hash => {}
            Ok(recomputed) => {
                diverged = true;
                self.push_error(format!(
                    "Content tampering at entry {}: stored hash {}, recomputed {}",
                    seq, entry.entry_hash, recomputed
                ));
            }
            Err(AuditError::EncodingError(msg)) => {
                diverged = true;
                self.push_error(format!("Entry {} cannot be re-encoded: {}", seq, msg));
            }
            Err(err) => return Err(err),
        }

        if let Some(last) = self.last_timestamp {
            if entry.fields.timestamp < last {
                self.warnings.push(format!(
                    "Non-monotonic timestamp at entry {}: {} < {}",
                    seq, entry.fields.timestamp, last
                ));
            }
        }

        self.examined += 1;
        if diverged {
            if self.broken_at.is_none() {
                warn!(sequence_id = seq, "Audit chain divergence detected");
                self.broken_at = Some(seq);
            }
        } else if self.broken_at.is_none() {
            self.checkpoint = Some(Checkpoint {
                sequence_id: seq,
                entry_hash: entry.entry_hash,
                entries_verified: self.examined,
            });
        }

        // resync on the stored entry so later, independent breaks are reported too
        self.expected_prev = entry.entry_hash;
        self.expected_seq = seq + 1;
        self.last_timestamp = Some(entry.fields.timestamp);
        Ok(())
    }

    fn record_unreadable(&mut self, sequence_id: i64, reason: &str) {
        self.push_error(format!("Entry {} is unreadable: {}", sequence_id, reason));
        if self.broken_at.is_none() {
            warn!(sequence_id, "Unreadable audit entry");
            self.broken_at = Some(sequence_id);
        }
    }

    fn push_error(&mut self, message: String) {
        if self.errors.len() < MAX_REPORTED_ERRORS {
            self.errors.push(message);
        } else {
            self.suppressed_errors += 1;
        }
    }

    fn finish(mut self, complete: bool) -> VerificationReport {
        if self.suppressed_errors > 0 {
            self.errors
                .push(format!("... {} further errors not shown", self.suppressed_errors));
        }
        VerificationReport {
            valid: self.broken_at.is_none(),
            total_entries: self.examined,
            broken_at_sequence_id: self.broken_at,
            errors: self.errors,
            warnings: self.warnings,
            checkpoint: self.checkpoint,
            complete,
            verified_at: Utc::now(),
        }
    }
}
