use audit_chain::audit::canonical::hash_entry;
use audit_chain::audit::{AuditValue, AuditWriter, ChainVerifier, EntryFields, EventFields, GENESIS};
use audit_chain::database::{ChainStore, Order};
use chrono::{TimeZone, Utc};
use std::collections::HashSet;
use std::sync::Arc;

mod common;
use common::*;

#[tokio::test]
async fn test_sequential_writes_verify() {
    let store = setup_test_store().await;
    let service = test_service(store);
    record_events(&service, 12).await;

    let report = service.verify_integrity().await.unwrap();
    assert!(report.valid, "{:?}", report.errors);
    assert!(report.complete);
    assert_eq!(report.total_entries, 12);
    assert!(report.broken_at_sequence_id.is_none());
    assert!(report.warnings.is_empty());
}

#[tokio::test]
async fn test_genesis_entry() {
    let store = setup_test_store().await;
    let service = test_service(store);
    let entries = record_events(&service, 1).await;

    assert_eq!(entries[0].prev_hash, GENESIS);
    assert_eq!(entries[0].sequence_id, 1);
    let report = service.verify_integrity().await.unwrap();
    assert!(report.valid);
    assert_eq!(report.total_entries, 1);
}

#[tokio::test]
async fn test_hash_is_deterministic() {
    let fields = EntryFields {
        timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        actor: test_actor(),
        event: role_change("user-7", "viewer", "owner"),
    };
    let prev = audit_chain::audit::canonical::sha256(b"previous entry");

    let first = hash_entry(&fields, &prev).unwrap();
    let second = hash_entry(&fields.clone(), &prev).unwrap();
    assert_eq!(first, second);
    assert_ne!(first, hash_entry(&fields, &GENESIS).unwrap());
}

#[tokio::test]
async fn test_stored_entries_recompute_to_stored_hash() {
    let store = setup_test_store().await;
    let service = test_service(store.clone());
    record_events(&service, 4).await;

    let page = store.range(None, 10, Order::Ascending).await.unwrap();
    for entry in page.entries {
        assert_eq!(
            hash_entry(&entry.fields, &entry.prev_hash).unwrap(),
            entry.entry_hash
        );
    }
}

async fn assert_tamper_detected(sql: &str, expected_break: i64) {
    let store = setup_test_store().await;
    let service = test_service(store.clone());
    record_events(&service, 6).await;

    tamper(&store, sql).await;

    let report = service.verify_integrity().await.unwrap();
    assert!(!report.valid, "tampering not detected: {}", sql);
    assert_eq!(report.broken_at_sequence_id, Some(expected_break), "{}", sql);
    assert!(!report.errors.is_empty());
}

#[tokio::test]
async fn test_field_tampering_is_detected() {
    let cases = [
        r#"UPDATE audit_entries SET after_state = '{"role":"owner"}' WHERE sequence_id = 3"#,
        "UPDATE audit_entries SET action = 'user.view' WHERE sequence_id = 2",
        "UPDATE audit_entries SET object_id = 'user-999' WHERE sequence_id = 4",
        "UPDATE audit_entries SET actor_email = 'mallory@example.com' WHERE sequence_id = 1",
        "UPDATE audit_entries SET actor_ip = NULL WHERE sequence_id = 5",
        "UPDATE audit_entries SET reason = NULL WHERE sequence_id = 6",
        "UPDATE audit_entries SET timestamp = '2020-01-01T00:00:00.000000Z' WHERE sequence_id = 3",
    ];
    let expected = [3, 2, 4, 1, 5, 6, 3];

    for (sql, seq) in cases.iter().zip(expected) {
        assert_tamper_detected(sql, seq).await;
    }
}

#[tokio::test]
async fn test_rewritten_hash_breaks_next_link() {
    // recomputing an entry's own hash after editing it still breaks its successor
    let store = setup_test_store().await;
    let service = test_service(store.clone());
    let entries = record_events(&service, 4).await;

    let mut forged = entries[1].fields.clone();
    forged.event.object_id = "user-999".to_string();
    let forged_hash = hash_entry(&forged, &entries[1].prev_hash).unwrap();

    tamper(
        &store,
        &format!(
            "UPDATE audit_entries SET object_id = 'user-999', entry_hash = '{}' WHERE sequence_id = 2",
            forged_hash
        ),
    )
    .await;

    let report = service.verify_integrity().await.unwrap();
    assert!(!report.valid);
    assert_eq!(report.broken_at_sequence_id, Some(3));
}

#[tokio::test]
async fn test_deleted_entry_is_detected() {
    let store = setup_test_store().await;
    let service = test_service(store.clone());
    record_events(&service, 5).await;

    tamper(&store, "DELETE FROM audit_entries WHERE sequence_id = 3").await;

    let report = service.verify_integrity().await.unwrap();
    assert!(!report.valid);
    assert_eq!(report.broken_at_sequence_id, Some(4));
    assert_eq!(report.total_entries, 4);
}

#[tokio::test]
async fn test_reordered_entries_are_detected() {
    let store = setup_test_store().await;
    let service = test_service(store.clone());
    record_events(&service, 5).await;

    tamper(
        &store,
        "UPDATE audit_entries SET sequence_id = 100 WHERE sequence_id = 2; \
         UPDATE audit_entries SET sequence_id = 2 WHERE sequence_id = 3; \
         UPDATE audit_entries SET sequence_id = 3 WHERE sequence_id = 100;",
    )
    .await;

    let report = service.verify_integrity().await.unwrap();
    assert!(!report.valid);
    assert_eq!(report.broken_at_sequence_id, Some(2));
}

#[tokio::test]
async fn test_undecodable_row_is_reported() {
    let store = setup_test_store().await;
    let service = test_service(store.clone());
    record_events(&service, 4).await;

    tamper(
        &store,
        "UPDATE audit_entries SET before_state = 'not json' WHERE sequence_id = 2",
    )
    .await;

    let report = service.verify_integrity().await.unwrap();
    assert!(!report.valid);
    assert_eq!(report.broken_at_sequence_id, Some(2));
    assert_eq!(report.total_entries, 1);
    assert_eq!(report.checkpoint.map(|c| c.sequence_id), Some(1));
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("unreadable"));
}

#[tokio::test]
async fn test_break_before_undecodable_row_leads() {
    let store = setup_test_store().await;
    let service = test_service(store.clone());
    record_events(&service, 4).await;

    tamper(
        &store,
        "UPDATE audit_entries SET action = 'user.view' WHERE sequence_id = 1; \
         UPDATE audit_entries SET before_state = 'not json' WHERE sequence_id = 2;",
    )
    .await;

    // whole chain on one page
    let report = ChainVerifier::with_page_size(store.clone(), 500)
        .verify(None)
        .await
        .unwrap();
    assert!(!report.valid);
    assert_eq!(report.broken_at_sequence_id, Some(1));
    assert_eq!(report.total_entries, 1);
    assert!(report.checkpoint.is_none());
    assert_eq!(report.errors.len(), 2);
    assert!(report.errors[0].contains("Content tampering at entry 1"));
    assert!(report.errors[1].contains("Entry 2 is unreadable"));
}

#[tokio::test]
async fn test_undecodable_row_on_later_page() {
    let store = setup_test_store().await;
    let service = test_service(store.clone());
    record_events(&service, 6).await;

    tamper(
        &store,
        "UPDATE audit_entries SET after_state = '{broken' WHERE sequence_id = 5",
    )
    .await;

    let report = ChainVerifier::with_page_size(store.clone(), 3)
        .verify(None)
        .await
        .unwrap();
    assert!(!report.valid);
    assert_eq!(report.broken_at_sequence_id, Some(5));
    assert_eq!(report.total_entries, 4);
    assert_eq!(report.checkpoint.map(|c| c.sequence_id), Some(4));
}

#[tokio::test]
async fn test_extreme_float_snapshot_verifies() {
    let store = setup_test_store().await;
    let service = test_service(store.clone());

    for f in [1.0715660391465826e-75, -1.81996730402717e-179, 1.7976931348623157e308] {
        service
            .record_event(
                test_actor(),
                EventFields::new("billing.limit_change", "account", "acct-1")
                    .with_after(AuditValue::map([("limit", AuditValue::Float(f))])),
            )
            .await
            .unwrap();
    }

    let report = service.verify_integrity().await.unwrap();
    assert!(report.valid, "{:?}", report.errors);
    assert_eq!(report.total_entries, 3);
}

#[tokio::test]
async fn test_update_and_delete_are_rejected() {
    let store = setup_test_store().await;
    let service = test_service(store.clone());
    record_events(&service, 2).await;

    let update = sqlx::query("UPDATE audit_entries SET action = 'x' WHERE sequence_id = 1")
        .execute(store.pool())
        .await;
    assert!(update.is_err());

    let delete = sqlx::query("DELETE FROM audit_entries WHERE sequence_id = 2")
        .execute(store.pool())
        .await;
    assert!(delete.is_err());

    assert_eq!(store.count().await.unwrap(), 2);
    assert!(service.verify_integrity().await.unwrap().valid);
}

#[tokio::test]
async fn test_concurrent_writes_do_not_fork() {
    let store = setup_test_store().await;
    let service = test_service(store.clone());

    let mut handles = Vec::new();
    for i in 0..16 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .record_event(test_actor(), role_change(&format!("user-{}", i), "viewer", "admin"))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let page = store.range(None, 100, Order::Ascending).await.unwrap();
    assert_eq!(page.entries.len(), 16);
    let prev_hashes: HashSet<_> = page.entries.iter().map(|e| e.prev_hash).collect();
    assert_eq!(prev_hashes.len(), 16);

    let report = service.verify_integrity().await.unwrap();
    assert!(report.valid, "{:?}", report.errors);
    assert_eq!(report.total_entries, 16);
}

#[tokio::test]
async fn test_independent_writers_do_not_fork() {
    // two writers with separate append locks only share the store's compare-and-append
    let store = setup_test_store().await;
    let a = AuditWriter::with_retry_limit(store.clone(), 50);
    let b = AuditWriter::with_retry_limit(store.clone(), 50);

    let mut handles = Vec::new();
    for (name, writer) in [("a", a), ("b", b)] {
        handles.push(tokio::spawn(async move {
            for i in 0..8 {
                writer
                    .write(test_actor(), role_change(&format!("{}-{}", name, i), "viewer", "editor"))
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let report = ChainVerifier::new(store.clone()).verify(None).await.unwrap();
    assert!(report.valid, "{:?}", report.errors);
    assert_eq!(report.total_entries, 16);
}

#[tokio::test]
async fn test_pagination_visits_every_entry_once() {
    let store = setup_test_store().await;
    let service = test_service(store);
    record_events(&service, 10).await;

    let mut seen = Vec::new();
    let mut cursor = None;
    loop {
        let page = service.list_entries(cursor, Some(3)).await.unwrap();
        assert!(page.entries.len() <= 3);
        seen.extend(page.entries.iter().map(|e| e.sequence_id));
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    assert_eq!(seen, (1..=10).rev().collect::<Vec<i64>>());
}

#[tokio::test]
async fn test_checkpoint_resume_matches_full_pass() {
    let store = setup_test_store().await;
    let service = test_service(store.clone());
    record_events(&service, 9).await;

    let verifier = ChainVerifier::with_page_size(store.clone(), 2);
    let first = verifier.verify(None).await.unwrap();
    let checkpoint = first.checkpoint.unwrap();

    record_events(&service, 4).await;

    let resumed = verifier.verify(Some(checkpoint)).await.unwrap();
    let full = verifier.verify(None).await.unwrap();
    assert_eq!(resumed.valid, full.valid);
    assert_eq!(resumed.total_entries, full.total_entries);
    assert_eq!(resumed.checkpoint, full.checkpoint);
    assert_eq!(full.total_entries, 13);
}

#[tokio::test]
async fn test_verification_is_idempotent() {
    let store = setup_test_store().await;
    let service = test_service(store.clone());
    record_events(&service, 5).await;
    tamper(&store, "UPDATE audit_entries SET action = 'x' WHERE sequence_id = 4").await;

    let first = service.verify_integrity().await.unwrap();
    let second = service.verify_integrity().await.unwrap();
    assert_eq!(first.valid, second.valid);
    assert_eq!(first.broken_at_sequence_id, second.broken_at_sequence_id);
    assert_eq!(first.errors, second.errors);
    assert_eq!(store.count().await.unwrap(), 5);
}

#[tokio::test]
async fn test_shared_store_trait_object() {
    let store: Arc<dyn ChainStore> = setup_test_store().await;
    let writer = AuditWriter::new(store.clone());
    writer
        .write(test_actor(), role_change("user-1", "viewer", "editor"))
        .await
        .unwrap();
    assert_eq!(store.count().await.unwrap(), 1);
}
