use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use crate::api::error::AppError;
use crate::api::service::AuditService;
use crate::audit::entry::{ActorContext, AuditEntry, EventFields};
use crate::audit::merkle::ChainAnchor;
use crate::database::EntryPage;

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub cursor: Option<i64>,
    pub limit: Option<u32>,
}

/// `entries` recomputes an anchor over that many leading entries.
#[derive(Debug, Default, Deserialize)]
pub struct AnchorQuery {
    pub entries: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct RecordEventRequest {
    pub actor: ActorContext,
    pub event: EventFields,
}

pub fn audit_router(service: Arc<AuditService>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/audit/verify", get(last_verification).post(verify_chain))
        .route("/audit/entries", get(list_entries))
        .route("/audit/objects/:object_type/:object_id", get(object_history))
        .route("/audit/anchor", get(chain_anchor))
        .route("/audit/events", post(record_event))
        .with_state(service)
}

async fn health_check() -> Json<Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "audit-chain",
        "timestamp": chrono::Utc::now()
    }))
}

async fn verify_chain(State(service): State<Arc<AuditService>>) -> Result<Json<Value>, AppError> {
    info!("Verification requested");
    let report = service.verify_integrity().await?;
    Ok(Json(serde_json::to_value(&report).map_err(crate::error::AuditError::from)?))
}

async fn last_verification(State(service): State<Arc<AuditService>>) -> Result<Json<Value>, AppError> {
    let body = match service.last_verification().await {
        Some(report) => {
            let mut body = serde_json::to_value(&report).map_err(crate::error::AuditError::from)?;
            body["status"] = Value::from(if report.valid { "valid" } else { "broken" });
            body["lastVerifiedAt"] = serde_json::json!(report.verified_at);
            body
        }
        None => serde_json::json!({
            "status": "never_run",
            "lastVerifiedAt": null
        }),
    };
    Ok(Json(body))
}

async fn list_entries(
    State(service): State<Arc<AuditService>>,
    Query(page): Query<PageQuery>,
) -> Result<Json<EntryPage>, AppError> {
    Ok(Json(service.list_entries(page.cursor, page.limit).await?))
}

async fn object_history(
    State(service): State<Arc<AuditService>>,
    Path((object_type, object_id)): Path<(String, String)>,
    Query(page): Query<PageQuery>,
) -> Result<Json<EntryPage>, AppError> {
    Ok(Json(
        service
            .object_history(&object_type, &object_id, page.cursor, page.limit)
            .await?,
    ))
}

async fn chain_anchor(
    State(service): State<Arc<AuditService>>,
    Query(query): Query<AnchorQuery>,
) -> Result<Json<ChainAnchor>, AppError> {
    let anchor = match query.entries {
        Some(entries) => service.anchor_at(entries).await?,
        None => service.anchor().await?,
    };
    Ok(Json(anchor))
}

async fn record_event(
    State(service): State<Arc<AuditService>>,
    Json(request): Json<RecordEventRequest>,
) -> Result<(StatusCode, Json<AuditEntry>), AppError> {
    let entry = service.record_event(request.actor, request.event).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}
