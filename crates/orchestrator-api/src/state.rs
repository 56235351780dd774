//! Shared application state for all API handlers: every subsystem
//! wired together once at startup and handed to axum as `State`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use orchestrator_core::cache::{SemanticQueryCache, SubgraphCache};
use orchestrator_core::config::{env_vars::{env_string, env_usize}, OrchestratorConfig, VectorStoreBackend};
use orchestrator_core::entity_resolver::EntityResolver;
use orchestrator_core::error::{OrchestratorError, Result};
use orchestrator_core::ingestion::{CoalescingOutbox, DurableOutboxDrainer, IngestionOrchestrator, IngestionReport};
use orchestrator_core::jobs::SharedJobStore;
use orchestrator_core::resilience::{CircuitBreakerRegistry, DistributedLock};
use orchestrator_core::retrieval::{RetrievalEngine, RetrievalOutcome};
use orchestrator_core::tenancy::{TenantConnectionTracker, TenantRegistry, TenantRouter};
use orchestrator_core::traits::{GraphStore, OutboxStore, StateStore, VectorStore};
use orchestrator_core::worker_pool::WorkerPools;
use orchestrator_observability::MetricsRegistry;
use orchestrator_redis::{RedisDistributedStore, RedisOutboxStore, RedisStateStore};

use crate::auth::TokenVerifier;
use crate::resilient_store::{ResilientGraphStore, ResilientVectorStore};

/// HTTP-layer knobs that don't belong in [`OrchestratorConfig`] because
/// they govern the edge, not the orchestration logic itself.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_body_size: usize,
    pub rate_limit_rpm: u32,
    pub cors_enabled: bool,
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_body_size: 10 * 1024 * 1024,
            rate_limit_rpm: env_string("API_RATE_LIMIT_RPM", "600").parse().unwrap_or(600),
            cors_enabled: env_string("API_CORS_ENABLED", "false") == "true",
            // No wildcard fallback: an empty list means no CORS headers are
            // added at all, not "allow everything".
            cors_origins: env_string("API_CORS_ORIGINS", "")
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

/// Sliding-window request counter keyed by tenant or client identifier.
/// In-memory only — fine for a single replica; a multi-replica
/// deployment would need this backed by the same Redis instance as
/// everything else, which is future work if this ever becomes a
/// bottleneck.
pub struct RateLimiterState {
    requests: RwLock<HashMap<String, RequestCount>>,
    config: RateLimiterConfig,
}

#[derive(Clone)]
struct RequestCount {
    count: u32,
    window_start: Instant,
}

#[derive(Clone)]
pub struct RateLimiterConfig {
    pub requests_per_window: u32,
    pub window_duration: Duration,
}

pub enum RateLimitResult {
    Allowed { remaining: u32 },
    Limited { retry_after_secs: u32 },
}

impl RateLimiterState {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self { requests: RwLock::new(HashMap::new()), config }
    }

    pub async fn check_and_increment(&self, key: &str) -> RateLimitResult {
        let mut requests = self.requests.write().await;
        let now = Instant::now();

        let entry = requests.entry(key.to_string()).or_insert(RequestCount { count: 0, window_start: now });

        if now.duration_since(entry.window_start) > self.config.window_duration {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count += 1;

        if entry.count > self.config.requests_per_window {
            let reset_at = entry.window_start + self.config.window_duration;
            RateLimitResult::Limited { retry_after_secs: reset_at.saturating_duration_since(now).as_secs() as u32 }
        } else {
            RateLimitResult::Allowed { remaining: self.config.requests_per_window - entry.count }
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<OrchestratorConfig>,
    pub server: Arc<ServerConfig>,
    pub retrieval_engine: Arc<RetrievalEngine>,
    pub ingestion: Arc<IngestionOrchestrator>,
    /// Kept alongside the engines that own their own clone, purely so
    /// the readiness probe has something cheap to exercise.
    pub graph: Arc<dyn GraphStore>,
    /// Guards concurrent ingestion batches for the same tenant — two
    /// overlapping batches would otherwise race on the tombstone sweep.
    pub ingestion_lock: Arc<DistributedLock>,
    pub outbox_drainer: Arc<DurableOutboxDrainer>,
    pub tenant_registry: Arc<TenantRegistry>,
    pub tenant_router: Arc<TenantRouter>,
    pub tenant_connections: Arc<TenantConnectionTracker>,
    pub query_jobs: SharedJobStore<RetrievalOutcome>,
    pub ingest_jobs: SharedJobStore<IngestionReport>,
    pub token_verifier: Arc<TokenVerifier>,
    pub metrics: Arc<MetricsRegistry>,
    pub rate_limiter: Arc<RateLimiterState>,
}

fn neo4j_config() -> orchestrator_neo4j::Neo4jConfig {
    let replicas = env_string("NEO4J_REPLICA_URIS", "");
    orchestrator_neo4j::Neo4jConfig {
        primary_uri: env_string("NEO4J_URI", "bolt://localhost:7687"),
        replica_uris: replicas.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect(),
        user: env_string("NEO4J_USER", "neo4j"),
        password: env_string("NEO4J_PASSWORD", "neo4j"),
        database: env_string("NEO4J_DATABASE", "neo4j"),
    }
}

impl AppState {
    /// Connects to every backing store and wires the full orchestrator
    /// graph. Fails fast if any backing store is unreachable at
    /// startup rather than lazily on first request.
    pub async fn connect(config: OrchestratorConfig, server: ServerConfig) -> Result<Self> {
        let graph: Arc<dyn GraphStore> = Arc::new(orchestrator_neo4j::Neo4jGraphStore::connect(neo4j_config()).await?);

        let vector: Arc<dyn VectorStore> = match config.vector_store.backend {
            VectorStoreBackend::Qdrant => {
                let url = env_string("QDRANT_URL", "http://localhost:6334");
                Arc::new(orchestrator_qdrant::QdrantVectorStore::connect(&url)?)
            }
            VectorStoreBackend::Memory => {
                return Err(OrchestratorError::Internal(
                    "VECTOR_STORE_BACKEND=memory has no production VectorStore; set it to qdrant".to_string(),
                ))
            }
        };

        let redis_url = env_string("REDIS_URL", "redis://localhost:6379");
        let redis_conn = orchestrator_redis::connect(&redis_url).await?;

        let state_store: Arc<dyn StateStore> = Arc::new(RedisStateStore::new(redis_conn.clone()));
        let outbox_store: Arc<dyn OutboxStore> = Arc::new(RedisOutboxStore::new(redis_conn.clone()));
        let distributed_store: Arc<dyn orchestrator_core::traits::DistributedStore> =
            Arc::new(RedisDistributedStore::new(redis_conn));
        let ingestion_lock = Arc::new(DistributedLock::new(distributed_store, config.distributed_lock.clone()));

        let graph_breakers = Arc::new(CircuitBreakerRegistry::new("neo4j", config.circuit_breaker.clone(), state_store.clone()));
        let vector_breakers = Arc::new(CircuitBreakerRegistry::new("qdrant", config.circuit_breaker.clone(), state_store));

        let graph: Arc<dyn GraphStore> = Arc::new(ResilientGraphStore::new(graph, graph_breakers));
        let vector: Arc<dyn VectorStore> = Arc::new(ResilientVectorStore::new(vector, vector_breakers));

        let subgraph_cache = Arc::new(SubgraphCache::new(config.subgraph_cache.maxsize));
        let semantic_cache = Arc::new(SemanticQueryCache::new(0.92));
        let entity_resolver = Arc::new(EntityResolver::new(config.entity_resolver.max_known));
        let outbox = Arc::new(CoalescingOutbox::new(config.vector_sync.coalesce_window));

        let default_workers = std::thread::available_parallelism().map(std::num::NonZeroUsize::get).unwrap_or(4);
        let rerank_pool = Arc::new(WorkerPools::new(env_usize("CPU_POOL_MAX_WORKERS", default_workers)));

        let retrieval_engine = Arc::new(
            RetrievalEngine::new(
                graph.clone(),
                None,
                subgraph_cache.clone(),
                semantic_cache,
                config.retrieval.clone(),
                config.cost.clone(),
                config.acl.default_deny_untagged,
            )
            .with_worker_pools(rerank_pool),
        );

        let ingestion = Arc::new(IngestionOrchestrator::new(
            graph.clone(),
            entity_resolver,
            subgraph_cache,
            outbox,
            config.ingestion.clone(),
        ));

        let outbox_drainer = Arc::new(DurableOutboxDrainer::new(outbox_store, vector, config.vector_sync.max_retries));

        let tenant_registry = Arc::new(TenantRegistry::new());
        let tenant_router = Arc::new(TenantRouter::new(tenant_registry.clone(), env_string("DEFAULT_DATABASE", "neo4j")));
        let tenant_connections = Arc::new(TenantConnectionTracker::from_config(&config.tenant_quota));

        let query_jobs: SharedJobStore<RetrievalOutcome> = Arc::new(orchestrator_core::jobs::JobStore::new(config.job_store.ttl));
        let ingest_jobs: SharedJobStore<IngestionReport> = Arc::new(orchestrator_core::jobs::JobStore::new(config.job_store.ttl));

        let token_verifier = Arc::new(TokenVerifier::from_config(&config.auth)?);
        let metrics = MetricsRegistry::global();
        let rate_limiter = Arc::new(RateLimiterState::new(RateLimiterConfig {
            requests_per_window: server.rate_limit_rpm,
            window_duration: Duration::from_secs(60),
        }));

        Ok(Self {
            config: Arc::new(config),
            server: Arc::new(server),
            retrieval_engine,
            ingestion,
            graph,
            ingestion_lock,
            outbox_drainer,
            tenant_registry,
            tenant_router,
            tenant_connections,
            query_jobs,
            ingest_jobs,
            token_verifier,
            metrics,
            rate_limiter,
        })
    }

    /// Spawns the durable outbox drain loop on a fixed interval. The
    /// returned handle is never awaited by callers; it runs for the
    /// life of the process.
    pub fn spawn_outbox_drainer(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let drainer = self.outbox_drainer.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match drainer.drain_pending().await {
                    Ok(report) if report.processed > 0 || report.discarded > 0 => {
                        tracing::info!(
                            processed = report.processed,
                            retried = report.retried,
                            discarded = report.discarded,
                            "outbox drain cycle"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => tracing::warn!(error = %err, "outbox drain cycle failed"),
                }
            }
        })
    }
}
