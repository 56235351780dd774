//! HTTP server exposing `/metrics` (Prometheus scrape) and `/health`.

use crate::error::Result;
use crate::metrics::MetricsRegistry;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Starts the metrics server and blocks until it exits.
pub async fn serve_metrics(port: u16) -> Result<()> {
    let (_, server_future) = serve_metrics_with_addr(port).await?;
    server_future.await
}

/// Starts the metrics server, returning the bound address and a future
/// that drives it. Pass port `0` to let the OS assign one (test-friendly).
pub async fn serve_metrics_with_addr(
    port: u16,
) -> Result<(
    std::net::SocketAddr,
    impl std::future::Future<Output = Result<()>>,
)> {
    let registry = MetricsRegistry::global();

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(registry);

    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| crate::error::Error::Metrics(format!("failed to bind to {addr}: {e}")))?;

    let local_addr = listener
        .local_addr()
        .map_err(|e| crate::error::Error::Metrics(format!("failed to read local addr: {e}")))?;

    tracing::info!(%local_addr, "metrics server listening");

    let server_future = async move {
        axum::serve(listener, app)
            .await
            .map_err(|e| crate::error::Error::Metrics(format!("server error: {e}")))
    };

    Ok((local_addr, server_future))
}

async fn metrics_handler(State(registry): State<Arc<MetricsRegistry>>) -> Response {
    match registry.export() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to export metrics: {e}"),
        )
            .into_response(),
    }
}

async fn health_handler() -> Response {
    (StatusCode::OK, "OK").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn metrics_and_health_endpoints_respond() {
        let (addr, server_future) = serve_metrics_with_addr(0).await.unwrap();
        let handle = tokio::spawn(server_future);

        let client = reqwest::Client::new();
        let health = client
            .get(format!("http://{addr}/health"))
            .send()
            .await
            .unwrap();
        assert_eq!(health.status(), 200);

        let metrics = client
            .get(format!("http://{addr}/metrics"))
            .send()
            .await
            .unwrap();
        assert_eq!(metrics.status(), 200);

        handle.abort();
    }
}
