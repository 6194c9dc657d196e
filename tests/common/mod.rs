#![allow(dead_code)]

use audit_chain::api::AuditService;
use audit_chain::audit::{ActorContext, AuditEntry, AuditValue, EventFields};
use audit_chain::config::AppConfig;
use audit_chain::database::schema::APPEND_ONLY_TRIGGERS;
use audit_chain::database::SqliteChainStore;
use std::sync::Arc;

/// Setup an in-memory chain store for testing
pub async fn setup_test_store() -> Arc<SqliteChainStore> {
    Arc::new(
        SqliteChainStore::new_in_memory()
            .await
            .expect("Failed to create test store"),
    )
}

/// Service over `store` with small pages so paging paths get exercised
pub fn test_service(store: Arc<SqliteChainStore>) -> Arc<AuditService> {
    let config = AppConfig {
        default_page_size: 5,
        max_page_size: 20,
        verify_page_size: 3,
        ..AppConfig::default()
    };
    Arc::new(AuditService::new(store, &config))
}

pub fn test_actor() -> ActorContext {
    ActorContext::new("user-42", "alice@example.com", "admin").with_source_ip("10.0.0.7")
}

pub fn role_change(user: &str, from: &str, to: &str) -> EventFields {
    EventFields::new("user.role_change", "user", user)
        .with_before(AuditValue::map([("role", AuditValue::from(from))]))
        .with_after(AuditValue::map([("role", AuditValue::from(to))]))
        .with_reason("quarterly access review")
}

/// Record `count` role changes on distinct users
pub async fn record_events(service: &AuditService, count: usize) -> Vec<AuditEntry> {
    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let entry = service
            .record_event(test_actor(), role_change(&format!("user-{}", i), "viewer", "editor"))
            .await
            .expect("Failed to record event");
        entries.push(entry);
    }
    entries
}

/// Rewrite stored data behind the chain's back.
///
/// The append-only triggers are dropped first, the way an attacker with
/// direct database access would.
pub async fn tamper(store: &SqliteChainStore, sql: &str) {
    for trigger in APPEND_ONLY_TRIGGERS {
        sqlx::query(&format!("DROP TRIGGER IF EXISTS {}", trigger))
            .execute(store.pool())
            .await
            .expect("Failed to drop trigger");
    }

    sqlx::raw_sql(sql)
        .execute(store.pool())
        .await
        .expect("Failed to tamper with store");
}
