//! HTTP route handlers, grouped by resource.

pub mod health;
pub mod ingest;
pub mod metrics;
pub mod query;

use crate::state::AppState;
use axum::Router;

pub fn api_router(state: AppState) -> Router {
    let api = Router::new().nest("/api/v1", query::routes().merge(ingest::routes()));

    Router::new().merge(api).merge(health::routes()).merge(metrics::routes()).with_state(state)
}
