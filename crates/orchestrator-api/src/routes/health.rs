//! Liveness and readiness probes.
//!
//! `/health` always returns 200 once the process is up. `/ready`
//! exercises the graph store connection so a load balancer can pull a
//! replica that lost its database before it serves real traffic.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check)).route("/ready", get(readiness_check)).route("/", get(root))
}

#[derive(Serialize)]
struct ServiceInfo {
    name: &'static str,
    version: &'static str,
}

async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo { name: "orchestrator-api", version: env!("CARGO_PKG_VERSION") })
}

#[derive(Serialize)]
struct HealthStatus {
    status: &'static str,
    timestamp: chrono::DateTime<chrono::Utc>,
}

async fn health_check() -> Json<HealthStatus> {
    Json(HealthStatus { status: "healthy", timestamp: chrono::Utc::now() })
}

#[derive(Debug, Serialize)]
struct ReadinessStatus {
    ready: bool,
    checks: ReadinessChecks,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReadinessChecks {
    graph: bool,
}

async fn readiness_check(State(state): State<AppState>) -> Result<Json<ReadinessStatus>, (StatusCode, Json<ReadinessStatus>)> {
    let mut error = None;
    let graph_ok = match state.graph.execute_read("RETURN 1", BTreeMap::new()).await {
        Ok(_) => true,
        Err(err) => {
            warn!(error = %err, "readiness check: graph store unreachable");
            error = Some(err.to_string());
            false
        }
    };

    let status = ReadinessStatus { ready: graph_ok, checks: ReadinessChecks { graph: graph_ok }, error };

    if graph_ok {
        Ok(Json(status))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(status)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_check_reports_healthy() {
        let response = health_check().await;
        assert_eq!(response.status, "healthy");
    }
}
