//! Wires routes, middleware, and state into a runnable [`axum::Router`].
//!
//! Middleware layers (outermost to innermost): error passthrough, CORS,
//! rate limiting, auth context, request id, metrics. The body-size limit
//! is applied last, which in tower's layering means it runs first —
//! oversized requests are rejected before anything else executes.

use axum::middleware;
use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;

use crate::middleware as mw;
use crate::routes;
use crate::state::AppState;
use orchestrator_core::error::{OrchestratorError, Result};

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)) }
    }
}

impl ApiConfig {
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.bind_addr.set_port(port);
        self
    }
}

pub struct ApiServer {
    config: ApiConfig,
    state: AppState,
    router: Router,
}

impl ApiServer {
    pub fn new(config: ApiConfig, state: AppState) -> Self {
        let router = build_router(&state);
        Self { config, state, router }
    }

    pub fn addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| OrchestratorError::Internal(format!("failed to bind {}: {e}", self.config.bind_addr)))?;

        tracing::info!(addr = %self.config.bind_addr, "orchestrator-api listening");

        axum::serve(listener, self.router).await.map_err(|e| OrchestratorError::Internal(format!("server error: {e}")))?;
        Ok(())
    }

    pub async fn run_until<F>(self, shutdown_signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| OrchestratorError::Internal(format!("failed to bind {}: {e}", self.config.bind_addr)))?;

        tracing::info!(addr = %self.config.bind_addr, "orchestrator-api listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| OrchestratorError::Internal(format!("server error: {e}")))?;

        tracing::info!("orchestrator-api shutdown complete");
        Ok(())
    }
}

fn build_router(state: &AppState) -> Router {
    let max_body_size = state.server.max_body_size;
    let api = routes::api_router(state.clone());

    let router = api
        .layer(middleware::from_fn(mw::error_handler_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), mw::cors_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), mw::rate_limit_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), mw::auth_context_middleware))
        .layer(middleware::from_fn(mw::request_id_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), mw::metrics_middleware));

    router.layer(RequestBodyLimitLayer::new(max_body_size))
}
