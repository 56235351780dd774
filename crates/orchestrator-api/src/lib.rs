//! HTTP edge for the retrieval orchestrator: JWT auth, rate limiting,
//! circuit-breaker-wrapped store access, and the query/ingest routes
//! that drive `orchestrator-core`.

pub mod auth;
pub mod error;
pub mod middleware;
pub mod resilient_store;
pub mod routes;
pub mod server;
pub mod state;

pub use server::{ApiConfig, ApiServer};
pub use state::{AppState, ServerConfig};
