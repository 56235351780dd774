//! Maps [`OrchestratorError`] onto an HTTP response using the status
//! code and sanitized message the core crate already computes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use orchestrator_core::error::OrchestratorError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: &'static str,
    pub message: String,
}

pub struct ApiErrorResponse(pub OrchestratorError);

impl From<OrchestratorError> for ApiErrorResponse {
    fn from(err: OrchestratorError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status().0).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ApiError {
            code: error_code(&self.0),
            message: self.0.sanitize(),
        };
        (status, Json(body)).into_response()
    }
}

fn error_code(err: &OrchestratorError) -> &'static str {
    use OrchestratorError::{
        AclCoverage, AuthConfiguration, CircuitOpen, CypherValidation, DistributedStore,
        GraphStore, Internal, InvalidIngestionRequest, InvalidToken, Jwt, PromptInjectionBlocked,
        RegistryUnavailable, Serialization, TenantQuotaExceeded, UnknownTenant, VectorStore,
    };
    match err {
        CypherValidation(_) => "CYPHER_VALIDATION_FAILED",
        InvalidIngestionRequest(_) => "INVALID_INGESTION_REQUEST",
        AclCoverage => "INTERNAL_ERROR",
        PromptInjectionBlocked => "PROMPT_INJECTION_BLOCKED",
        InvalidToken | Jwt(_) => "INVALID_TOKEN",
        AuthConfiguration(_) => "AUTH_UNAVAILABLE",
        CircuitOpen { .. } => "SERVICE_UNAVAILABLE",
        TenantQuotaExceeded { .. } => "TENANT_QUOTA_EXCEEDED",
        RegistryUnavailable => "SERVICE_UNAVAILABLE",
        UnknownTenant(_) => "UNKNOWN_TENANT",
        GraphStore(_) | VectorStore(_) | DistributedStore(_) => "UPSTREAM_UNAVAILABLE",
        Serialization(_) | Internal(_) => "INTERNAL_ERROR",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_open_maps_to_service_unavailable_code() {
        let err = OrchestratorError::CircuitOpen { breaker: "neo4j".to_string(), retry_after_secs: 5 };
        let response = ApiErrorResponse::from(err).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn invalid_token_maps_to_401() {
        let response = ApiErrorResponse::from(OrchestratorError::InvalidToken).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn unknown_tenant_gets_its_own_code() {
        assert_eq!(error_code(&OrchestratorError::UnknownTenant("t1".to_string())), "UNKNOWN_TENANT");
    }
}
