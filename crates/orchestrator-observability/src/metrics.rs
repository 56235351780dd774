//! Prometheus metrics for the retrieval orchestrator.
//!
//! One [`MetricsRegistry`] per process, reached through [`MetricsRegistry::global`]
//! so every crate (query router, resilience substrate, ingestion pipeline) can
//! record against the same registry without threading it through every call.

use crate::error::{Error, Result};
use prometheus::{Encoder, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::{Arc, OnceLock};

static GLOBAL: OnceLock<Arc<MetricsRegistry>> = OnceLock::new();

pub struct MetricsRegistry {
    registry: Registry,

    /// Retrieval latency, labeled by path: `vector`, `single_hop`, `multi_hop`, `hybrid`.
    pub query_latency_seconds: HistogramVec,
    /// Labeled by tier: `l1`, `l2`.
    pub cache_hits_total: IntCounterVec,
    pub cache_misses_total: IntCounterVec,
    /// Labeled by breaker name (e.g. `neo4j`, `qdrant`, `llm`).
    pub circuit_breaker_trips_total: IntCounterVec,
    /// Current state per breaker: 0 = closed, 1 = open, 2 = half-open.
    pub circuit_breaker_state: IntGaugeVec,
    /// Labeled by tenant id.
    pub ingestion_documents_total: IntCounterVec,
    pub ingestion_errors_total: IntCounterVec,
    /// Labeled by tenant id and outcome (`allowed`, `denied`).
    pub tenant_requests_total: IntCounterVec,
}

impl MetricsRegistry {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let query_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "orchestrator_query_latency_seconds",
                "Retrieval query latency by path",
            ),
            &["path"],
        )
        .map_err(|e| Error::Metrics(e.to_string()))?;

        let cache_hits_total = IntCounterVec::new(
            Opts::new("orchestrator_cache_hits_total", "Cache hits by tier"),
            &["tier"],
        )
        .map_err(|e| Error::Metrics(e.to_string()))?;

        let cache_misses_total = IntCounterVec::new(
            Opts::new("orchestrator_cache_misses_total", "Cache misses by tier"),
            &["tier"],
        )
        .map_err(|e| Error::Metrics(e.to_string()))?;

        let circuit_breaker_trips_total = IntCounterVec::new(
            Opts::new(
                "orchestrator_circuit_breaker_trips_total",
                "Circuit breaker open transitions by breaker name",
            ),
            &["breaker"],
        )
        .map_err(|e| Error::Metrics(e.to_string()))?;

        let circuit_breaker_state = IntGaugeVec::new(
            Opts::new(
                "orchestrator_circuit_breaker_state",
                "Circuit breaker state by breaker name (0=closed, 1=open, 2=half-open)",
            ),
            &["breaker"],
        )
        .map_err(|e| Error::Metrics(e.to_string()))?;

        let ingestion_documents_total = IntCounterVec::new(
            Opts::new(
                "orchestrator_ingestion_documents_total",
                "Documents ingested by tenant",
            ),
            &["tenant_id"],
        )
        .map_err(|e| Error::Metrics(e.to_string()))?;

        let ingestion_errors_total = IntCounterVec::new(
            Opts::new(
                "orchestrator_ingestion_errors_total",
                "Ingestion errors by tenant",
            ),
            &["tenant_id"],
        )
        .map_err(|e| Error::Metrics(e.to_string()))?;

        let tenant_requests_total = IntCounterVec::new(
            Opts::new(
                "orchestrator_tenant_requests_total",
                "Requests by tenant and outcome",
            ),
            &["tenant_id", "outcome"],
        )
        .map_err(|e| Error::Metrics(e.to_string()))?;

        for collector in [
            Box::new(query_latency_seconds.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(cache_hits_total.clone()),
            Box::new(cache_misses_total.clone()),
            Box::new(circuit_breaker_trips_total.clone()),
            Box::new(circuit_breaker_state.clone()),
            Box::new(ingestion_documents_total.clone()),
            Box::new(ingestion_errors_total.clone()),
            Box::new(tenant_requests_total.clone()),
        ] {
            registry
                .register(collector)
                .map_err(|e| Error::Metrics(e.to_string()))?;
        }

        Ok(Self {
            registry,
            query_latency_seconds,
            cache_hits_total,
            cache_misses_total,
            circuit_breaker_trips_total,
            circuit_breaker_state,
            ingestion_documents_total,
            ingestion_errors_total,
            tenant_requests_total,
        })
    }

    /// Returns the process-wide registry, building it on first access.
    #[must_use]
    pub fn global() -> Arc<MetricsRegistry> {
        GLOBAL
            .get_or_init(|| {
                Arc::new(MetricsRegistry::new().expect("metric descriptors are static and valid"))
            })
            .clone()
    }

    /// Renders the registry in Prometheus text exposition format.
    pub fn export(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| Error::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| Error::Metrics(e.to_string()))
    }
}
