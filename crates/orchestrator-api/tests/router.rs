//! Router-level integration tests driven with `tower::ServiceExt::oneshot`,
//! grounded on the teacher's `api::server` test suite. Every backing
//! store is an in-process fake — no network, no real Neo4j/Qdrant/Redis.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use orchestrator_core::cache::{SemanticQueryCache, SubgraphCache};
use orchestrator_core::config::{
    AclConfig, AuthConfig, CircuitBreakerConfig, CostEstimatorConfig, DeploymentMode, DistributedLockConfig,
    EntityResolverConfig, IngestionConfig, JobStoreConfig, RetrievalConfig, TenantQuotaConfig, VectorSyncConfig,
};
use orchestrator_core::entity_resolver::EntityResolver;
use orchestrator_core::error::Result as CoreResult;
use orchestrator_core::ingestion::{CoalescingOutbox, DurableOutboxDrainer, IngestionOrchestrator};
use orchestrator_core::jobs::JobStore;
use orchestrator_core::model::{SearchResult, VectorRecord};
use orchestrator_core::resilience::DistributedLock;
use orchestrator_core::retrieval::RetrievalEngine;
use orchestrator_core::tenancy::{TenantConnectionTracker, TenantRegistry, TenantRouter};
use orchestrator_core::traits::{DistributedStore, GraphRow, GraphStore, OutboxStore, VectorStore};
use orchestrator_observability::MetricsRegistry;
use orchestrator_api::auth::TokenVerifier;
use orchestrator_api::server::{ApiConfig, ApiServer};
use orchestrator_api::state::{AppState, RateLimiterConfig, RateLimiterState, ServerConfig};
use serde_json::Value;
use tower::util::ServiceExt;

struct EmptyGraph;

#[async_trait]
impl GraphStore for EmptyGraph {
    async fn execute_read(&self, _cypher: &str, _params: BTreeMap<String, Value>) -> CoreResult<Vec<GraphRow>> {
        Ok(vec![])
    }
    async fn execute_write(&self, _cypher: &str, _params: BTreeMap<String, Value>) -> CoreResult<Vec<GraphRow>> {
        Ok(vec![])
    }
}

struct EmptyVector;

#[async_trait]
impl VectorStore for EmptyVector {
    async fn upsert(&self, _collection: &str, records: Vec<VectorRecord>) -> CoreResult<usize> {
        Ok(records.len())
    }
    async fn search(&self, _collection: &str, _query: Vec<f32>, _limit: usize) -> CoreResult<Vec<SearchResult>> {
        Ok(vec![])
    }
    async fn delete(&self, _collection: &str, ids: Vec<String>, _tenant_id: Option<&str>) -> CoreResult<usize> {
        Ok(ids.len())
    }
}

#[derive(Default)]
struct InMemoryDistributed {
    values: parking_lot::Mutex<std::collections::HashMap<String, String>>,
}

#[async_trait]
impl DistributedStore for InMemoryDistributed {
    async fn get(&self, key: &str) -> CoreResult<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }
    async fn set_nx_ex(&self, key: &str, value: &str, _ttl_secs: u64) -> CoreResult<bool> {
        let mut guard = self.values.lock();
        if guard.contains_key(key) {
            Ok(false)
        } else {
            guard.insert(key.to_string(), value.to_string());
            Ok(true)
        }
    }
    async fn compare_and_delete(&self, key: &str, expected_value: &str) -> CoreResult<bool> {
        let mut guard = self.values.lock();
        if guard.get(key).map(String::as_str) == Some(expected_value) {
            guard.remove(key);
            Ok(true)
        } else {
            Ok(false)
        }
    }
    async fn delete(&self, key: &str) -> CoreResult<bool> {
        Ok(self.values.lock().remove(key).is_some())
    }
    async fn delete_prefix(&self, prefix: &str) -> CoreResult<u64> {
        let mut guard = self.values.lock();
        let keys: Vec<String> = guard.keys().filter(|k| k.starts_with(prefix)).cloned().collect();
        for k in &keys {
            guard.remove(k);
        }
        Ok(keys.len() as u64)
    }
    async fn zadd(&self, _key: &str, _member: &str, _score: f64) -> CoreResult<()> {
        Ok(())
    }
    async fn zremrangebyscore(&self, _key: &str, _min: f64, _max: f64) -> CoreResult<u64> {
        Ok(0)
    }
    async fn zcard(&self, _key: &str) -> CoreResult<u64> {
        Ok(0)
    }
    async fn zrem(&self, _key: &str, _member: &str) -> CoreResult<bool> {
        Ok(false)
    }
}

struct NoopOutbox;

#[async_trait]
impl OutboxStore for NoopOutbox {
    async fn write_event(&self, _event: &orchestrator_core::model::VectorSyncEvent) -> CoreResult<()> {
        Ok(())
    }
    async fn load_pending(&self) -> CoreResult<Vec<orchestrator_core::model::VectorSyncEvent>> {
        Ok(vec![])
    }
    async fn remove(&self, _event_id: &str) -> CoreResult<()> {
        Ok(())
    }
}

fn test_state() -> AppState {
    let graph: Arc<dyn GraphStore> = Arc::new(EmptyGraph);
    let vector: Arc<dyn VectorStore> = Arc::new(EmptyVector);
    let distributed: Arc<dyn DistributedStore> = Arc::new(InMemoryDistributed::default());
    let outbox_store: Arc<dyn OutboxStore> = Arc::new(NoopOutbox);

    let breaker_config = CircuitBreakerConfig { failure_threshold: 5, recovery_timeout: Duration::from_secs(30), jitter_factor: 0.1, half_open_max_calls: 1 };

    let retrieval_engine = Arc::new(RetrievalEngine::new(
        graph.clone(),
        None,
        Arc::new(SubgraphCache::new(100)),
        Arc::new(SemanticQueryCache::new(0.9)),
        RetrievalConfig { degree_cap: 50, high_degree_threshold: 200 },
        CostEstimatorConfig { max_query_cost: 500, max_path_depth: 6, max_results_default: 50 },
        true,
    ));

    let ingestion = Arc::new(IngestionOrchestrator::new(
        graph.clone(),
        Arc::new(EntityResolver::new(1000)),
        Arc::new(SubgraphCache::new(100)),
        Arc::new(CoalescingOutbox::new(Duration::from_millis(50))),
        IngestionConfig { sink_batch_size: 500, sync_timeout: Duration::from_secs(5) },
    ));

    let ingestion_lock = Arc::new(DistributedLock::new(distributed, DistributedLockConfig { ttl: Duration::from_secs(10), retry_attempts: 3, retry_delay: Duration::from_millis(10) }));
    let outbox_drainer = Arc::new(DurableOutboxDrainer::new(outbox_store, vector, 3));

    let tenant_registry = Arc::new(TenantRegistry::new());
    let tenant_router = Arc::new(TenantRouter::new(tenant_registry.clone(), "neo4j".to_string()));
    let tenant_connections = Arc::new(TenantConnectionTracker::from_config(&TenantQuotaConfig { pool_size: 20, max_tenant_fraction: 0.5 }));

    let server = ServerConfig { max_body_size: 1024, rate_limit_rpm: 600, cors_enabled: false, cors_origins: vec![] };
    let rate_limiter = Arc::new(RateLimiterState::new(RateLimiterConfig { requests_per_window: server.rate_limit_rpm, window_duration: Duration::from_secs(60) }));

    AppState {
        config: Arc::new(orchestrator_core::config::OrchestratorConfig {
            auth: AuthConfig { token_secret: None, require_tokens: false, token_ttl: Duration::from_secs(3600), deployment_mode: DeploymentMode::Dev },
            acl: AclConfig { default_deny_untagged: true },
            cost: CostEstimatorConfig { max_query_cost: 500, max_path_depth: 6, max_results_default: 50 },
            retrieval: RetrievalConfig { degree_cap: 50, high_degree_threshold: 200 },
            subgraph_cache: orchestrator_core::config::SubgraphCacheConfig { maxsize: 100, l2_ttl: Duration::from_secs(60) },
            ingestion: IngestionConfig { sink_batch_size: 500, sync_timeout: Duration::from_secs(5) },
            job_store: JobStoreConfig { ttl: Duration::from_secs(3600) },
            context_ranking: orchestrator_core::config::ContextRankingConfig { rerank_timeout: Duration::from_secs(2), truncation_timeout: Duration::from_secs(1) },
            circuit_breaker: breaker_config,
            distributed_lock: DistributedLockConfig { ttl: Duration::from_secs(10), retry_attempts: 3, retry_delay: Duration::from_millis(10) },
            tenant_quota: TenantQuotaConfig { pool_size: 20, max_tenant_fraction: 0.5 },
            entity_resolver: EntityResolverConfig { max_known: 1000 },
            vector_sync: VectorSyncConfig { coalesce_window: Duration::from_millis(50), max_retries: 3 },
            vector_store: orchestrator_core::config::VectorStoreConfig { backend: orchestrator_core::config::VectorStoreBackend::Memory },
            prompt_guardrails: orchestrator_core::config::PromptGuardrailsConfig { enabled: true, hard_block: false },
        }),
        server: Arc::new(server),
        retrieval_engine,
        ingestion,
        graph,
        ingestion_lock,
        outbox_drainer,
        tenant_registry,
        tenant_router,
        tenant_connections,
        query_jobs: Arc::new(JobStore::new(Duration::from_secs(3600))),
        ingest_jobs: Arc::new(JobStore::new(Duration::from_secs(3600))),
        token_verifier: Arc::new(TokenVerifier::from_config(&AuthConfig { token_secret: None, require_tokens: false, token_ttl: Duration::from_secs(3600), deployment_mode: DeploymentMode::Dev }).unwrap()),
        metrics: MetricsRegistry::global(),
        rate_limiter,
    }
}

#[tokio::test]
async fn health_endpoint_returns_ok() {
    let server = ApiServer::new(ApiConfig::default(), test_state());
    let router = server.router();

    let response = router.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn readiness_endpoint_succeeds_against_the_fake_graph() {
    let server = ApiServer::new(ApiConfig::default(), test_state());
    let router = server.router();

    let response = router.oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn oversized_request_body_is_rejected_with_413() {
    let server = ApiServer::new(ApiConfig::default(), test_state());
    let router = server.router();

    let oversized_body = vec![b'x'; 4096];
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/query")
        .header("content-type", "application/json")
        .body(Body::from(oversized_body))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn anonymous_query_is_accepted_when_tokens_are_not_required() {
    let server = ApiServer::new(ApiConfig::default(), test_state());
    let router = server.router();

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/query")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"query": "checkout-service", "limit": 5}"#))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
