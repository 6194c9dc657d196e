//! Audit API
//!
//! Thin layer translating HTTP calls and in-process calls into writer and
//! verifier operations.

pub mod error;
pub mod routes;
pub mod service;

pub use error::AppError;
pub use routes::audit_router;
pub use service::{spawn_scheduled_verification, AuditService};
