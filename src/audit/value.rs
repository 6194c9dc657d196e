//! Snapshot Values
//!
//! `before`/`after` snapshots are restricted to a closed set of value types
//! so that every snapshot has exactly one canonical encoding.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{AuditError, AuditResult};

/// Structured snapshot value attached to an audit entry.
///
/// Maps are `BTreeMap`s, so key order never depends on insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuditValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    List(Vec<AuditValue>),
    Map(BTreeMap<String, AuditValue>),
}

impl AuditValue {
    /// Convert any serializable value into a snapshot.
    ///
    /// Fails with `EncodingError` for values JSON cannot express, such as
    /// maps keyed by non-strings.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> AuditResult<Self> {
        let json = serde_json::to_value(value)?;
        Ok(Self::from(json))
    }

    /// Build a map value from key/value pairs.
    pub fn map<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, AuditValue)>,
    {
        AuditValue::Map(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Parse a stored JSON snapshot column.
    pub fn from_json_str(text: &str) -> AuditResult<Self> {
        let json: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| AuditError::EncodingError(format!("Invalid snapshot JSON: {}", e)))?;
        Ok(Self::from(json))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AuditValue::Null)
    }
}

impl From<serde_json::Value> for AuditValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => AuditValue::Null,
            serde_json::Value::Bool(b) => AuditValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    AuditValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    AuditValue::UInt(u)
                } else {
                    // serde_json numbers are always finite
                    AuditValue::Float(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => AuditValue::String(s),
            serde_json::Value::Array(items) => {
                AuditValue::List(items.into_iter().map(AuditValue::from).collect())
            }
            serde_json::Value::Object(fields) => AuditValue::Map(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, AuditValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for AuditValue {
    fn from(value: &str) -> Self {
        AuditValue::String(value.to_string())
    }
}

impl From<String> for AuditValue {
    fn from(value: String) -> Self {
        AuditValue::String(value)
    }
}

impl From<bool> for AuditValue {
    fn from(value: bool) -> Self {
        AuditValue::Bool(value)
    }
}

impl From<i64> for AuditValue {
    fn from(value: i64) -> Self {
        AuditValue::Int(value)
    }
}

impl From<u64> for AuditValue {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(i) => AuditValue::Int(i),
            Err(_) => AuditValue::UInt(value),
        }
    }
}

impl From<f64> for AuditValue {
    fn from(value: f64) -> Self {
        AuditValue::Float(value)
    }
}

impl<T: Into<AuditValue>> From<Vec<T>> for AuditValue {
    fn from(items: Vec<T>) -> Self {
        AuditValue::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, AuditValue>> for AuditValue {
    fn from(fields: BTreeMap<String, AuditValue>) -> Self {
        AuditValue::Map(fields)
    }
}
