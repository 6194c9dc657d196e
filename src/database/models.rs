use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::audit::entry::{ActorContext, AuditEntry, ChainHash, EntryFields, EventFields};
use crate::audit::value::AuditValue;
use crate::error::AuditError;

/// Column list shared by every entry query, in `AuditEntryRow` order.
pub const ENTRY_COLUMNS: &str = "sequence_id, timestamp, actor_user_id, actor_email, actor_role, \
     actor_ip, action, object_type, object_id, before_state, after_state, reason, \
     entry_hash, prev_hash";

/// One row of `audit_entries`, exactly as stored.
#[derive(Debug, Clone, FromRow)]
pub struct AuditEntryRow {
    pub sequence_id: i64,
    pub timestamp: String,
    pub actor_user_id: String,
    pub actor_email: String,
    pub actor_role: String,
    pub actor_ip: Option<String>,
    pub action: String,
    pub object_type: String,
    pub object_id: String,
    pub before_state: Option<String>,
    pub after_state: Option<String>,
    pub reason: Option<String>,
    pub entry_hash: String,
    pub prev_hash: String,
}

impl TryFrom<AuditEntryRow> for AuditEntry {
    type Error = AuditError;

    fn try_from(row: AuditEntryRow) -> Result<Self, Self::Error> {
        let seq = row.sequence_id;
        let corrupt = |what: &str, err: &dyn std::fmt::Display| {
            AuditError::corrupt_entry(seq, format!("unreadable {}: {}", what, err))
        };

        let timestamp = DateTime::parse_from_rfc3339(&row.timestamp)
            .map_err(|e| corrupt("timestamp", &e))?
            .with_timezone(&Utc);
        let before = parse_snapshot(row.before_state.as_deref()).map_err(|e| corrupt("before", &e))?;
        let after = parse_snapshot(row.after_state.as_deref()).map_err(|e| corrupt("after", &e))?;
        let entry_hash: ChainHash = row.entry_hash.parse().map_err(|e| corrupt("entry_hash", &e))?;
        let prev_hash: ChainHash = row.prev_hash.parse().map_err(|e| corrupt("prev_hash", &e))?;

        Ok(AuditEntry {
            sequence_id: seq,
            fields: EntryFields {
                timestamp,
                actor: ActorContext {
                    user_id: row.actor_user_id,
                    email: row.actor_email,
                    role: row.actor_role,
                    source_ip: row.actor_ip,
                },
                event: EventFields {
                    action: row.action,
                    object_type: row.object_type,
                    object_id: row.object_id,
                    before,
                    after,
                    reason: row.reason,
                },
            },
            entry_hash,
            prev_hash,
        })
    }
}

fn parse_snapshot(text: Option<&str>) -> Result<Option<AuditValue>, AuditError> {
    text.map(AuditValue::from_json_str).transpose()
}
