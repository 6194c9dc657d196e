//! Canonical Encoding
//!
//! Deterministic byte encoding of an entry's hashed fields. The layout is
//! a compact JSON object with a fixed, explicitly written key order:
//!
//! `{"v":1,"timestamp":..,"actor":{"user_id":..,"email":..,"role":..,"source_ip":..},
//!   "action":..,"object_type":..,"object_id":..,"before":..,"after":..,
//!   "reason":..,"prev_hash":..}`
//!
//! Nested snapshot maps are emitted with sorted keys. Absent optionals are
//! `null`. Changing any of this changes every hash in existing chains.

use chrono::SecondsFormat;
use sha2::{Digest, Sha256};

use crate::audit::entry::{ChainHash, EntryFields};
use crate::audit::value::AuditValue;
use crate::error::{AuditError, AuditResult};

/// Version tag written into every encoding.
pub const ENCODING_VERSION: u32 = 1;

/// Deepest snapshot nesting accepted by the encoder.
pub const MAX_DEPTH: usize = 64;

/// Encode an entry's fields together with its predecessor's hash.
pub fn encode(fields: &EntryFields, prev_hash: &ChainHash) -> AuditResult<Vec<u8>> {
    let mut out = String::with_capacity(256);

    out.push_str("{\"v\":");
    out.push_str(&ENCODING_VERSION.to_string());

    out.push_str(",\"timestamp\":");
    write_str(
        &mut out,
        &fields.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
    )?;

    out.push_str(",\"actor\":{\"user_id\":");
    write_str(&mut out, &fields.actor.user_id)?;
    out.push_str(",\"email\":");
    write_str(&mut out, &fields.actor.email)?;
    out.push_str(",\"role\":");
    write_str(&mut out, &fields.actor.role)?;
    out.push_str(",\"source_ip\":");
    write_opt_str(&mut out, fields.actor.source_ip.as_deref())?;
    out.push('}');

    let event = &fields.event;
    out.push_str(",\"action\":");
    write_str(&mut out, &event.action)?;
    out.push_str(",\"object_type\":");
    write_str(&mut out, &event.object_type)?;
    out.push_str(",\"object_id\":");
    write_str(&mut out, &event.object_id)?;
    out.push_str(",\"before\":");
    write_opt_value(&mut out, event.before.as_ref())?;
    out.push_str(",\"after\":");
    write_opt_value(&mut out, event.after.as_ref())?;
    out.push_str(",\"reason\":");
    write_opt_str(&mut out, event.reason.as_deref())?;

    out.push_str(",\"prev_hash\":");
    write_str(&mut out, &prev_hash.to_string())?;
    out.push('}');

    Ok(out.into_bytes())
}

/// SHA-256 over the canonical encoding.
pub fn hash_entry(fields: &EntryFields, prev_hash: &ChainHash) -> AuditResult<ChainHash> {
    let bytes = encode(fields, prev_hash)?;
    Ok(sha256(&bytes))
}

pub fn sha256(bytes: &[u8]) -> ChainHash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    ChainHash::from_bytes(hasher.finalize().into())
}

/// Canonical text of a single snapshot value, as stored in the snapshot columns.
pub fn encode_value(value: &AuditValue) -> AuditResult<String> {
    let mut out = String::new();
    write_value(&mut out, value, 0)?;
    Ok(out)
}

fn write_str(out: &mut String, s: &str) -> AuditResult<()> {
    out.push_str(&serde_json::to_string(s)?);
    Ok(())
}

fn write_opt_str(out: &mut String, s: Option<&str>) -> AuditResult<()> {
    match s {
        Some(s) => write_str(out, s),
        None => {
            out.push_str("null");
            Ok(())
        }
    }
}

fn write_opt_value(out: &mut String, value: Option<&AuditValue>) -> AuditResult<()> {
    match value {
        Some(v) => write_value(out, v, 0),
        None => {
            out.push_str("null");
            Ok(())
        }
    }
}

fn write_value(out: &mut String, value: &AuditValue, depth: usize) -> AuditResult<()> {
    if depth > MAX_DEPTH {
        return Err(AuditError::EncodingError(format!(
            "Snapshot nesting exceeds {} levels",
            MAX_DEPTH
        )));
    }

    match value {
        AuditValue::Null => out.push_str("null"),
        AuditValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        AuditValue::Int(i) => out.push_str(&i.to_string()),
        AuditValue::UInt(u) => out.push_str(&u.to_string()),
        AuditValue::Float(f) => write_float(out, *f)?,
        AuditValue::String(s) => write_str(out, s)?,
        AuditValue::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item, depth + 1)?;
            }
            out.push(']');
        }
        AuditValue::Map(fields) => {
            out.push('{');
            for (i, (key, item)) in fields.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_str(out, key)?;
                out.push(':');
                write_value(out, item, depth + 1)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

fn write_float(out: &mut String, f: f64) -> AuditResult<()> {
    if !f.is_finite() {
        return Err(AuditError::EncodingError(format!(
            "Non-finite number {} cannot be encoded",
            f
        )));
    }
    if f == 0.0 {
        // -0.0 and 0.0 are the same logical value
        out.push('0');
    } else {
        // shortest representation that round-trips, e.g. 2.0 -> "2"
        out.push_str(&f.to_string());
    }
    Ok(())
}
