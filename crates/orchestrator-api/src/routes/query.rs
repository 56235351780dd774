//! Query endpoints: synchronous retrieval and an async job variant for
//! callers that would rather poll than hold a connection open across a
//! multi-hop traversal.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use orchestrator_core::model::SecurityPrincipal;
use orchestrator_core::retrieval::RetrievalOutcome;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiErrorResponse;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/query", post(run_query))
        .route("/query/async", post(submit_query))
        .route("/query/{job_id}", get(query_status))
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    100
}

async fn run_query(
    State(state): State<AppState>,
    principal: axum::extract::Extension<SecurityPrincipal>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<RetrievalOutcome>, ApiErrorResponse> {
    let outcome = state.retrieval_engine.execute(&req.query, &principal, req.limit).await?;
    Ok(Json(outcome))
}

#[derive(Debug, Serialize)]
struct JobAccepted {
    job_id: Uuid,
}

async fn submit_query(
    State(state): State<AppState>,
    principal: axum::extract::Extension<SecurityPrincipal>,
    Json(req): Json<QueryRequest>,
) -> Json<JobAccepted> {
    let job_id = state.query_jobs.create();
    state.query_jobs.mark_running(job_id);

    let engine = state.retrieval_engine.clone();
    let jobs = state.query_jobs.clone();
    let principal = principal.0;
    tokio::spawn(async move {
        match engine.execute(&req.query, &principal, req.limit).await {
            Ok(outcome) => jobs.complete(job_id, outcome),
            Err(err) => jobs.fail(job_id, err.to_string()),
        }
    });

    Json(JobAccepted { job_id })
}

#[derive(Debug, Serialize)]
struct JobStatusResponse {
    status: orchestrator_core::model::JobStatus,
    result: Option<RetrievalOutcome>,
    error: Option<String>,
}

async fn query_status(State(state): State<AppState>, Path(job_id): Path<Uuid>) -> Result<Json<JobStatusResponse>, ApiErrorResponse> {
    let record = state
        .query_jobs
        .get(job_id)
        .ok_or_else(|| orchestrator_core::error::OrchestratorError::Internal("unknown job id".to_string()))?;
    Ok(Json(JobStatusResponse { status: record.status, result: record.result, error: record.error }))
}
