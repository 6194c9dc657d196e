// Database schema definitions and migrations
// This module contains the SQL schema for the audit chain database

pub const AUDIT_CHAIN_SCHEMA: &str = include_str!("../../migrations/001_audit_chain.sql");

/// Triggers that make `audit_entries` append-only.
pub const APPEND_ONLY_TRIGGERS: [&str; 2] = ["audit_entries_no_update", "audit_entries_no_delete"];
