//! Audit Service
//!
//! Entry point for everything outside the chain: governed code paths record
//! events through it, the HTTP routes read and verify through it.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::audit::entry::{ActorContext, AuditEntry, ChainHash, EventFields, GENESIS};
use crate::audit::merkle::{merkle_root, ChainAnchor};
use crate::audit::verify::{ChainVerifier, VerificationReport};
use crate::audit::writer::AuditWriter;
use crate::config::AppConfig;
use crate::database::{ChainStore, EntryPage, Order};
use crate::error::{AuditError, AuditResult};

pub struct AuditService {
    store: Arc<dyn ChainStore>,
    writer: AuditWriter,
    verifier: ChainVerifier,
    last_report: RwLock<Option<VerificationReport>>,
    verify_lock: Mutex<()>,
    default_page_size: u32,
    max_page_size: u32,
    verify_page_size: u32,
}

impl AuditService {
    pub fn new(store: Arc<dyn ChainStore>, config: &AppConfig) -> Self {
        Self {
            writer: AuditWriter::with_retry_limit(store.clone(), config.append_retry_limit),
            verifier: ChainVerifier::with_page_size(store.clone(), config.verify_page_size),
            store,
            last_report: RwLock::new(None),
            verify_lock: Mutex::new(()),
            default_page_size: config.default_page_size,
            max_page_size: config.max_page_size,
            verify_page_size: config.verify_page_size,
        }
    }

    /// Record a governed action. Callers must treat an error as a failed
    /// audit write, not log and continue.
    pub async fn record_event(
        &self,
        actor: ActorContext,
        event: EventFields,
    ) -> AuditResult<AuditEntry> {
        self.writer.write(actor, event).await
    }

    /// Page through the chain newest first.
    pub async fn list_entries(
        &self,
        cursor: Option<i64>,
        limit: Option<u32>,
    ) -> AuditResult<EntryPage> {
        self.store
            .range(cursor, self.page_limit(limit), Order::Descending)
            .await
    }

    /// History of one object, newest first.
    pub async fn object_history(
        &self,
        object_type: &str,
        object_id: &str,
        cursor: Option<i64>,
        limit: Option<u32>,
    ) -> AuditResult<EntryPage> {
        self.store
            .entries_for_object(object_type, object_id, cursor, self.page_limit(limit))
            .await
    }

    /// Run a full verification pass and cache its report.
    ///
    /// Passes run one at a time so the cache always holds the newest report.
    pub async fn verify_integrity(&self) -> AuditResult<VerificationReport> {
        let _pass = self.verify_lock.lock().await;
        let report = self.verifier.verify(None).await?;
        *self.last_report.write().await = Some(report.clone());
        Ok(report)
    }

    /// Report of the most recent pass, if any has run.
    pub async fn last_verification(&self) -> Option<VerificationReport> {
        self.last_report.read().await.clone()
    }

    /// Merkle root over every entry currently in the chain.
    pub async fn anchor(&self) -> AuditResult<ChainAnchor> {
        let total = self.store.count().await?;
        self.anchor_at(total).await
    }

    /// Merkle root over the first `total_entries` entries.
    ///
    /// The chain only grows, so an anchor published earlier can be
    /// recomputed from the same prefix at any later time.
    pub async fn anchor_at(&self, total_entries: u64) -> AuditResult<ChainAnchor> {
        if total_entries == 0 {
            return Ok(ChainAnchor {
                merkle_root: None,
                tail_hash: GENESIS,
                total_entries: 0,
            });
        }

        let mut hashes: Vec<ChainHash> = Vec::new();
        let mut cursor = None;
        'pages: loop {
            let page = self
                .store
                .range(cursor, self.verify_page_size, Order::Ascending)
                .await?;
            for entry in &page.entries {
                hashes.push(entry.entry_hash);
                if hashes.len() as u64 == total_entries {
                    break 'pages;
                }
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        if (hashes.len() as u64) < total_entries {
            return Err(AuditError::InvalidEvent(format!(
                "Cannot anchor {} entries, chain has {}",
                total_entries,
                hashes.len()
            )));
        }

        let root = merkle_root(&hashes)?;
        let anchor = ChainAnchor {
            merkle_root: Some(root),
            tail_hash: hashes[hashes.len() - 1],
            total_entries,
        };
        info!("Computed chain anchor: {}", anchor.summary());
        Ok(anchor)
    }

    fn page_limit(&self, limit: Option<u32>) -> u32 {
        limit
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size)
    }
}

/// Re-verify the chain every `interval`, caching each report.
pub fn spawn_scheduled_verification(
    service: Arc<AuditService>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match service.verify_integrity().await {
                Ok(report) if !report.valid => {
                    warn!("Scheduled verification found a broken chain: {}", report.summary());
                }
                Ok(_) => {}
                Err(e) => error!("Scheduled audit chain verification failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::merkle::verify_merkle_root;
    use crate::database::SqliteChainStore;

    async fn service() -> AuditService {
        let store = Arc::new(SqliteChainStore::new_in_memory().await.unwrap());
        let config = AppConfig {
            default_page_size: 2,
            max_page_size: 4,
            verify_page_size: 2,
            ..AppConfig::default()
        };
        AuditService::new(store, &config)
    }

    async fn record(service: &AuditService, object_id: &str) -> AuditEntry {
        service
            .record_event(
                ActorContext::new("u-1", "admin@example.com", "admin"),
                EventFields::new("document.share", "document", object_id),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_page_limits_are_clamped() {
        let service = service().await;
        for i in 0..6 {
            record(&service, &format!("doc-{}", i)).await;
        }

        let page = service.list_entries(None, None).await.unwrap();
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.entries[0].sequence_id, 6);

        let page = service.list_entries(None, Some(100)).await.unwrap();
        assert_eq!(page.entries.len(), 4);

        let page = service.list_entries(None, Some(0)).await.unwrap();
        assert_eq!(page.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_verification_is_cached() {
        let service = service().await;
        assert!(service.last_verification().await.is_none());

        record(&service, "doc-1").await;
        let report = service.verify_integrity().await.unwrap();
        assert!(report.valid);

        let cached = service.last_verification().await.unwrap();
        assert_eq!(cached, report);
    }

    #[tokio::test]
    async fn test_object_history() {
        let service = service().await;
        record(&service, "doc-1").await;
        record(&service, "doc-2").await;
        record(&service, "doc-1").await;

        let page = service
            .object_history("document", "doc-1", None, None)
            .await
            .unwrap();
        let ids: Vec<i64> = page.entries.iter().map(|e| e.sequence_id).collect();
        assert_eq!(ids, vec![3, 1]);
    }

    #[tokio::test]
    async fn test_anchor_covers_whole_chain() {
        let service = service().await;
        let empty = service.anchor().await.unwrap();
        assert!(empty.merkle_root.is_none());
        assert_eq!(empty.tail_hash, GENESIS);

        let mut hashes = Vec::new();
        for i in 0..5 {
            hashes.push(record(&service, &format!("doc-{}", i)).await.entry_hash);
        }

        let anchor = service.anchor().await.unwrap();
        assert_eq!(anchor.total_entries, 5);
        assert_eq!(anchor.tail_hash, hashes[4]);
        assert!(verify_merkle_root(&hashes, &anchor.merkle_root.unwrap()).unwrap());
    }

    #[tokio::test]
    async fn test_scheduled_verification_fills_cache() {
        let service = Arc::new(service().await);
        record(&service, "doc-1").await;

        let handle = spawn_scheduled_verification(service.clone(), Duration::from_secs(3600));
        for _ in 0..50 {
            if service.last_verification().await.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();

        let report = service.last_verification().await.unwrap();
        assert!(report.valid);
        assert_eq!(report.total_entries, 1);
    }

    #[tokio::test]
    async fn test_published_anchor_survives_growth() {
        let service = service().await;
        for i in 0..5 {
            record(&service, &format!("doc-{}", i)).await;
        }
        let published = service.anchor().await.unwrap();

        for i in 5..9 {
            record(&service, &format!("doc-{}", i)).await;
        }

        let current = service.anchor().await.unwrap();
        assert_eq!(current.total_entries, 9);
        assert_ne!(current.merkle_root, published.merkle_root);

        let replayed = service.anchor_at(published.total_entries).await.unwrap();
        assert_eq!(replayed, published);
    }

    #[tokio::test]
    async fn test_anchor_beyond_tail_is_rejected() {
        let service = service().await;
        record(&service, "doc-1").await;
        assert!(matches!(
            service.anchor_at(2).await,
            Err(AuditError::InvalidEvent(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_passes_cache_newest_report() {
        let service = Arc::new(service().await);
        for i in 0..6 {
            record(&service, &format!("doc-{}", i)).await;
        }

        let (a, b) = tokio::join!(service.verify_integrity(), service.verify_integrity());
        let newest = a.unwrap().verified_at.max(b.unwrap().verified_at);
        assert_eq!(service.last_verification().await.unwrap().verified_at, newest);
    }
}
