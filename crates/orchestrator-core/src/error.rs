//! Error taxonomy for the orchestrator core.
//!
//! Every recoverable failure surfaces as a distinct [`OrchestratorError`]
//! variant so the HTTP edge can map it to the exact status code in the
//! component design's error table, without leaking cypher bodies or
//! secrets into the response.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// HTTP status code a variant maps to at the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpStatus(pub u16);

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OrchestratorError {
    #[error("cypher validation failed: {0}")]
    CypherValidation(String),

    #[error("invalid ingestion request: {0}")]
    InvalidIngestionRequest(String),

    #[error("ACL coverage verification failed")]
    AclCoverage,

    #[error("prompt injection blocked")]
    PromptInjectionBlocked,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("auth misconfiguration: {0}")]
    AuthConfiguration(String),

    #[error("circuit open for '{breaker}', retry after {retry_after_secs}s")]
    CircuitOpen {
        breaker: String,
        retry_after_secs: u64,
    },

    #[error("tenant '{tenant_id}' exceeded connection quota")]
    TenantQuotaExceeded { tenant_id: String },

    #[error("tenant registry unavailable")]
    RegistryUnavailable,

    #[error("unknown tenant '{0}'")]
    UnknownTenant(String),

    #[error("graph store error: {0}")]
    GraphStore(String),

    #[error("vector store error: {0}")]
    VectorStore(String),

    #[error("distributed store error: {0}")]
    DistributedStore(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Status code per the component design's error handling table.
    #[must_use]
    pub fn http_status(&self) -> HttpStatus {
        use OrchestratorError::{
            AclCoverage, AuthConfiguration, CircuitOpen, CypherValidation, DistributedStore,
            GraphStore, Internal, InvalidIngestionRequest, InvalidToken, Jwt,
            PromptInjectionBlocked, RegistryUnavailable, Serialization, TenantQuotaExceeded,
            UnknownTenant, VectorStore,
        };
        let code = match self {
            CypherValidation(_) => 400,
            InvalidIngestionRequest(_) => 400,
            PromptInjectionBlocked => 400,
            InvalidToken | Jwt(_) => 401,
            AclCoverage | Internal(_) | Serialization(_) => 500,
            RegistryUnavailable => 500,
            UnknownTenant(_) => 404,
            AuthConfiguration(_) => 503,
            CircuitOpen { .. } => 503,
            GraphStore(_) | VectorStore(_) | DistributedStore(_) => 503,
            TenantQuotaExceeded { .. } => 429,
        };
        HttpStatus(code)
    }

    /// A message safe to return to an external caller: never echoes the
    /// triggering cypher body, a secret, or an internal error chain.
    #[must_use]
    pub fn sanitize(&self) -> String {
        match self {
            OrchestratorError::CypherValidation(_) => "query rejected by validation".to_string(),
            OrchestratorError::InvalidIngestionRequest(_) => "invalid ingestion request".to_string(),
            OrchestratorError::AclCoverage => "internal error".to_string(),
            OrchestratorError::PromptInjectionBlocked => {
                "request content was rejected".to_string()
            }
            OrchestratorError::InvalidToken => "invalid or expired token".to_string(),
            OrchestratorError::AuthConfiguration(_) => "authentication unavailable".to_string(),
            OrchestratorError::CircuitOpen { .. } => "service temporarily unavailable".to_string(),
            OrchestratorError::TenantQuotaExceeded { .. } => {
                "tenant connection quota exceeded".to_string()
            }
            OrchestratorError::RegistryUnavailable => "service temporarily unavailable".to_string(),
            OrchestratorError::UnknownTenant(_) => "unknown tenant".to_string(),
            OrchestratorError::GraphStore(_)
            | OrchestratorError::VectorStore(_)
            | OrchestratorError::DistributedStore(_) => "upstream store unavailable".to_string(),
            OrchestratorError::Serialization(_)
            | OrchestratorError::Jwt(_)
            | OrchestratorError::Internal(_) => "internal error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cypher_validation_maps_to_400() {
        let err = OrchestratorError::CypherValidation("write keyword".into());
        assert_eq!(err.http_status().0, 400);
        assert_eq!(err.sanitize(), "query rejected by validation");
    }

    #[test]
    fn acl_coverage_never_leaks_query() {
        let err = OrchestratorError::AclCoverage;
        assert_eq!(err.http_status().0, 500);
        assert_eq!(err.sanitize(), "internal error");
    }

    #[test]
    fn circuit_open_maps_to_503() {
        let err = OrchestratorError::CircuitOpen {
            breaker: "neo4j".into(),
            retry_after_secs: 5,
        };
        assert_eq!(err.http_status().0, 503);
    }

    #[test]
    fn tenant_quota_maps_to_429() {
        let err = OrchestratorError::TenantQuotaExceeded {
            tenant_id: "t1".into(),
        };
        assert_eq!(err.http_status().0, 429);
    }

    #[test]
    fn unknown_tenant_maps_to_404() {
        let err = OrchestratorError::UnknownTenant("ghost".into());
        assert_eq!(err.http_status().0, 404);
    }
}
