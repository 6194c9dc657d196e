//! Audit Entry
//!
//! Defines the structure of tamper-evident audit entries and the
//! SHA-256 digests that link them into a chain.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::audit::value::AuditValue;
use crate::error::{AuditError, AuditResult};

const HASH_PREFIX: &str = "sha256:";

/// SHA-256 digest identifying an entry in the chain.
///
/// Rendered as `sha256:<64 lowercase hex chars>`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainHash([u8; 32]);

/// `prev_hash` of the first entry ever written.
pub const GENESIS: ChainHash = ChainHash([0u8; 32]);

impl ChainHash {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_genesis(&self) -> bool {
        *self == GENESIS
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ChainHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", HASH_PREFIX, self.to_hex())
    }
}

impl fmt::Debug for ChainHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainHash({})", self)
    }
}

impl FromStr for ChainHash {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s.strip_prefix(HASH_PREFIX).unwrap_or(s);
        let bytes = hex::decode(hex_part)
            .map_err(|e| AuditError::EncodingError(format!("Invalid hash {:?}: {}", s, e)))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            AuditError::EncodingError(format!("Invalid hash {:?}: expected 32 bytes", s))
        })?;
        Ok(Self(bytes))
    }
}

impl Serialize for ChainHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChainHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Who performed a governed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorContext {
    pub user_id: String,
    pub email: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,
}

impl ActorContext {
    pub fn new(user_id: impl Into<String>, email: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
            role: role.into(),
            source_ip: None,
        }
    }

    pub fn with_source_ip(mut self, ip: impl Into<String>) -> Self {
        self.source_ip = Some(ip.into());
        self
    }

    pub fn validate(&self) -> AuditResult<()> {
        if self.user_id.trim().is_empty() {
            return Err(AuditError::missing_field("actor.userId"));
        }
        Ok(())
    }
}

/// Description of a governed action, as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFields {
    pub action: String,
    pub object_type: String,
    pub object_id: String,
    #[serde(default)]
    pub before: Option<AuditValue>,
    #[serde(default)]
    pub after: Option<AuditValue>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl EventFields {
    pub fn new(
        action: impl Into<String>,
        object_type: impl Into<String>,
        object_id: impl Into<String>,
    ) -> Self {
        Self {
            action: action.into(),
            object_type: object_type.into(),
            object_id: object_id.into(),
            before: None,
            after: None,
            reason: None,
        }
    }

    pub fn with_before(mut self, before: impl Into<AuditValue>) -> Self {
        self.before = Some(before.into());
        self
    }

    pub fn with_after(mut self, after: impl Into<AuditValue>) -> Self {
        self.after = Some(after.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn validate(&self) -> AuditResult<()> {
        if self.action.trim().is_empty() {
            return Err(AuditError::missing_field("action"));
        }
        if self.object_type.trim().is_empty() {
            return Err(AuditError::missing_field("objectType"));
        }
        if self.object_id.trim().is_empty() {
            return Err(AuditError::missing_field("objectId"));
        }
        Ok(())
    }
}

/// Every logical field of an entry that is covered by its hash,
/// except `prev_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryFields {
    pub timestamp: DateTime<Utc>,
    pub actor: ActorContext,
    #[serde(flatten)]
    pub event: EventFields,
}

impl EntryFields {
    /// Stamp an event with the current time.
    ///
    /// Timestamps are truncated to microseconds so the stored text form
    /// reproduces the exact value that was hashed.
    pub fn stamp(actor: ActorContext, event: EventFields) -> Self {
        Self {
            timestamp: Utc::now().trunc_subsecs(6),
            actor,
            event,
        }
    }
}

/// Audit entry as persisted in the chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub sequence_id: i64,
    #[serde(flatten)]
    pub fields: EntryFields,
    pub entry_hash: ChainHash,
    pub prev_hash: ChainHash,
}

impl AuditEntry {
    pub fn action(&self) -> &str {
        &self.fields.event.action
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "#{} {} {}:{} by {}",
            self.sequence_id,
            self.fields.event.action,
            self.fields.event.object_type,
            self.fields.event.object_id,
            self.fields.actor.user_id
        )
    }
}
