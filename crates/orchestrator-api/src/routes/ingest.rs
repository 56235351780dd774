//! Ingestion endpoints. Batches are committed under a per-tenant
//! distributed lock so two concurrent batches for the same tenant never
//! race on the tombstone sweep.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use orchestrator_core::ingestion::{ExtractedRecord, IngestionReport};
use orchestrator_core::model::SecurityPrincipal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiErrorResponse;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/ingest", post(run_ingest)).route("/ingest/async", post(submit_ingest)).route("/ingest/{job_id}", get(ingest_status))
}

#[derive(Debug, Deserialize)]
struct IngestRequest {
    tenant_id: String,
    records: Vec<ExtractedRecord>,
}

async fn run_ingest(
    State(state): State<AppState>,
    principal: axum::extract::Extension<SecurityPrincipal>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestionReport>, ApiErrorResponse> {
    require_same_tenant(&principal, &req.tenant_id)?;

    let ingestion = state.ingestion.clone();
    let tenant_id = req.tenant_id.clone();
    let records = req.records;
    let report = state
        .ingestion_lock
        .with_lock(&format!("ingest:{tenant_id}"), || async move { ingestion.ingest_batch(&tenant_id, records).await })
        .await?;
    Ok(Json(report))
}

#[derive(Debug, Serialize)]
struct JobAccepted {
    job_id: Uuid,
}

async fn submit_ingest(
    State(state): State<AppState>,
    principal: axum::extract::Extension<SecurityPrincipal>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<JobAccepted>, ApiErrorResponse> {
    require_same_tenant(&principal, &req.tenant_id)?;

    let job_id = state.ingest_jobs.create();
    state.ingest_jobs.mark_running(job_id);

    let ingestion = state.ingestion.clone();
    let lock = state.ingestion_lock.clone();
    let jobs = state.ingest_jobs.clone();
    let tenant_id = req.tenant_id.clone();
    let records = req.records;

    tokio::spawn(async move {
        let lock_key = format!("ingest:{tenant_id}");
        let result = lock.with_lock(&lock_key, || async move { ingestion.ingest_batch(&tenant_id, records).await }).await;
        match result {
            Ok(report) => jobs.complete(job_id, report),
            Err(err) => jobs.fail(job_id, err.to_string()),
        }
    });

    Ok(Json(JobAccepted { job_id }))
}

#[derive(Debug, Serialize)]
struct JobStatusResponse {
    status: orchestrator_core::model::JobStatus,
    result: Option<IngestionReport>,
    error: Option<String>,
}

async fn ingest_status(State(state): State<AppState>, Path(job_id): Path<Uuid>) -> Result<Json<JobStatusResponse>, ApiErrorResponse> {
    let record = state
        .ingest_jobs
        .get(job_id)
        .ok_or_else(|| orchestrator_core::error::OrchestratorError::Internal("unknown job id".to_string()))?;
    Ok(Json(JobStatusResponse { status: record.status, result: record.result, error: record.error }))
}

/// Ingestion writes belong to the caller's own tenant only — a reader
/// with valid credentials for tenant A must never be able to push data
/// into tenant B by naming it in the request body.
fn require_same_tenant(principal: &SecurityPrincipal, tenant_id: &str) -> Result<(), ApiErrorResponse> {
    match &principal.tenant_id {
        Some(t) if t == tenant_id => Ok(()),
        _ => Err(orchestrator_core::error::OrchestratorError::InvalidIngestionRequest(
            "request tenant_id does not match the caller's tenant".to_string(),
        )
        .into()),
    }
}
