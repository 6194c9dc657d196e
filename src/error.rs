use thiserror::Error;

impl From<serde_json::Error> for AuditError {
    fn from(err: serde_json::Error) -> Self {
        Self::EncodingError(format!("JSON serialization error: {}", err))
    }
}

impl From<sqlx::Error> for AuditError {
    fn from(err: sqlx::Error) -> Self {
        Self::StoreUnavailable(format!("Database error: {}", err))
    }
}

impl From<config::ConfigError> for AuditError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum AuditError {
    /// A field could not be canonically encoded. The write is rejected.
    #[error("Encoding error: {0}")]
    EncodingError(String),

    /// The persistence layer failed. Never swallowed.
    #[error("Audit store unavailable: {0}")]
    StoreUnavailable(String),

    /// The chain tail moved between reading it and appending. Retried by the writer.
    #[error("Concurrent append conflict: {0}")]
    ConcurrentAppendConflict(String),

    /// A stored row could not be decoded back into an entry.
    #[error("Corrupt audit entry {sequence_id}: {reason}")]
    CorruptEntry { sequence_id: i64, reason: String },

    #[error("Invalid audit event: {0}")]
    InvalidEvent(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AuditError {
    pub fn corrupt_entry(sequence_id: i64, reason: impl Into<String>) -> Self {
        Self::CorruptEntry {
            sequence_id,
            reason: reason.into(),
        }
    }

    pub fn missing_field(field: &str) -> Self {
        Self::InvalidEvent(format!("{} must not be empty", field))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrentAppendConflict(_))
    }
}

pub type AuditResult<T> = Result<T, AuditError>;
