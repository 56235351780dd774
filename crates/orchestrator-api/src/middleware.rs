//! Axum middleware layers: request id, rate limiting, JWT auth context,
//! CORS, error passthrough, and metrics. Layering order is fixed in
//! `server::build_router` — this module only defines the layers.

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use orchestrator_core::model::SecurityPrincipal;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::{AppState, RateLimitResult};

// ============================================================================
// Request ID
// ============================================================================

#[derive(Clone, Debug)]
pub struct RequestId(pub String);

pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;
    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", header_value);
    }
    response
}

// ============================================================================
// Rate limiting
// ============================================================================

pub async fn rate_limit_middleware(State(state): State<AppState>, headers: HeaderMap, request: Request, next: Next) -> Response {
    let client_id = get_client_id(&headers);

    match state.rate_limiter.check_and_increment(&client_id).await {
        RateLimitResult::Allowed { remaining } => {
            let mut response = next.run(request).await;
            if let Ok(header_value) = HeaderValue::from_str(&remaining.to_string()) {
                response.headers_mut().insert("x-ratelimit-remaining", header_value);
            }
            if let Ok(header_value) = HeaderValue::from_str(&state.server.rate_limit_rpm.to_string()) {
                response.headers_mut().insert("x-ratelimit-limit", header_value);
            }
            response
        }
        RateLimitResult::Limited { retry_after_secs } => {
            let error = ApiError { code: "RATE_LIMITED", message: format!("rate limit exceeded, retry after {retry_after_secs}s") };
            let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(error)).into_response();
            if let Ok(header_value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert("retry-after", header_value);
            }
            response
        }
    }
}

/// Bearer tokens authenticate by tenant, so the rate-limit key prefers
/// the tenant id once auth has run; this middleware runs before auth in
/// the stack (see `server::build_router`), so it falls back to client IP.
fn get_client_id(headers: &HeaderMap) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(ip) = forwarded.split(',').next() {
            return format!("ip:{}", ip.trim());
        }
    }
    "ip:unknown".to_string()
}

// ============================================================================
// Auth context
// ============================================================================

pub async fn auth_context_middleware(State(state): State<AppState>, headers: HeaderMap, mut request: Request, next: Next) -> Response {
    let token = bearer_token(&headers);
    match state.token_verifier.verify(token.as_deref()) {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(err) => crate::error::ApiErrorResponse::from(err).into_response(),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Rejects anonymous principals outright. Applied only to routes that
/// require a resolved tenant (ingestion), not to read paths where
/// `default_deny_untagged` already governs row-level visibility.
pub async fn require_auth_middleware(request: Request, next: Next) -> Response {
    let is_anonymous = request
        .extensions()
        .get::<SecurityPrincipal>()
        .map(|p| *p == SecurityPrincipal::anonymous())
        .unwrap_or(true);

    if is_anonymous {
        return crate::error::ApiErrorResponse::from(orchestrator_core::error::OrchestratorError::InvalidToken).into_response();
    }
    next.run(request).await
}

// ============================================================================
// CORS
// ============================================================================

pub async fn cors_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;

    // No wildcard fallback: an empty origin list means no CORS headers
    // are added at all, not "allow everything".
    if state.server.cors_enabled && !state.server.cors_origins.is_empty() {
        if let Some(origin) = state.server.cors_origins.first() {
            if origin == "*" {
                tracing::warn!("CORS wildcard '*' origin configured; do not use this in production");
            }
            if let Ok(header_value) = HeaderValue::from_str(origin) {
                response.headers_mut().insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, header_value);
            }
        }
        response
            .headers_mut()
            .insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"));
        response
            .headers_mut()
            .insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("Content-Type, Authorization, X-Request-Id"));
    }

    response
}

// ============================================================================
// Error passthrough
// ============================================================================

pub async fn error_handler_middleware(request: Request, next: Next) -> Response {
    next.run(request).await
}

// ============================================================================
// Metrics
// ============================================================================

pub async fn metrics_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let principal = request.extensions().get::<SecurityPrincipal>().cloned();
    let response = next.run(request).await;

    let tenant_id = principal.and_then(|p| p.tenant_id).unwrap_or_else(|| "unknown".to_string());
    let outcome = if response.status().is_success() { "allowed" } else { "denied" };
    state.metrics.tenant_requests_total.with_label_values(&[&tenant_id, outcome]).inc();

    response
}

/// Normalizes a request path for use as a label value, replacing
/// dynamic segments (UUIDs, tenant ids) so label cardinality stays
/// bounded. Currently unused by `metrics_middleware` (which labels by
/// tenant and outcome, not path) but kept for the `/metrics` endpoint's
/// own request logging.
pub fn normalize_path_for_metrics(path: &str) -> String {
    path.split('/')
        .map(|part| if Uuid::parse_str(part).is_ok() { ":id" } else { part })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_uuid_segments() {
        let path = format!("/api/v1/query/{}", Uuid::nil());
        assert_eq!(normalize_path_for_metrics(&path), "/api/v1/query/:id");
    }

    #[test]
    fn leaves_static_segments_alone() {
        assert_eq!(normalize_path_for_metrics("/api/v1/ingest"), "/api/v1/ingest");
    }
}
