//! Tracing and metrics for the retrieval orchestrator.
//!
//! Scoped to what the workspace's dependency set actually carries:
//! `tracing`/`tracing-subscriber` for structured logs and `prometheus`
//! behind an `axum` `/metrics` endpoint. No OTLP exporter — there's
//! nowhere in this deployment for spans to go yet.

pub mod config;
pub mod error;
pub mod metrics;
pub mod metrics_server;
pub mod tracer;

pub use config::{SamplingStrategy, TracingConfig};
pub use error::{Error, Result};
pub use metrics::MetricsRegistry;
pub use metrics_server::{serve_metrics, serve_metrics_with_addr};
pub use tracer::init_tracing;
