//! Environment-driven configuration for every subsystem.
//!
//! Each subsystem owns one `*Config` struct with a `from_env()`
//! constructor. Numeric knobs are clamped to a safe range at load time
//! rather than trusted; callers never re-validate.

use std::env;
use std::time::Duration;

/// Small env-var helpers, standing in for the module-discovery-era
/// `config_loader::env_vars` the adapter crates otherwise import.
pub mod env_vars {
    use std::env;

    pub const JWT_SECRET: &str = "AUTH_TOKEN_SECRET";

    pub fn env_string(key: &str, default: &str) -> String {
        env::var(key).unwrap_or_else(|_| default.to_string())
    }

    pub fn env_bool(key: &str, default: bool) -> bool {
        env::var(key)
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(default)
    }

    pub fn env_u64(key: &str, default: u64) -> u64 {
        env::var(key)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(default)
    }

    pub fn env_f64(key: &str, default: f64) -> f64 {
        env::var(key)
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(default)
    }

    pub fn env_usize(key: &str, default: usize) -> usize {
        env::var(key)
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(default)
    }
}

use env_vars::{env_bool, env_f64, env_string, env_u64, env_usize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentMode {
    Dev,
    Production,
}

impl DeploymentMode {
    pub fn from_env() -> Self {
        match env_string("DEPLOYMENT_MODE", "dev").as_str() {
            "production" => DeploymentMode::Production,
            _ => DeploymentMode::Dev,
        }
    }

    pub fn is_production(self) -> bool {
        matches!(self, DeploymentMode::Production)
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub token_secret: Option<String>,
    pub require_tokens: bool,
    pub token_ttl: Duration,
    pub deployment_mode: DeploymentMode,
}

impl AuthConfig {
    pub fn from_env() -> Self {
        let secret = env::var(env_vars::JWT_SECRET).ok().filter(|s| !s.is_empty());
        Self {
            token_secret: secret,
            require_tokens: env_bool("AUTH_REQUIRE_TOKENS", true),
            token_ttl: Duration::from_secs(env_u64("AUTH_TOKEN_TTL", 3600)),
            deployment_mode: DeploymentMode::from_env(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AclConfig {
    pub default_deny_untagged: bool,
}

impl AclConfig {
    pub fn from_env() -> Self {
        Self {
            default_deny_untagged: env_bool("ACL_DEFAULT_DENY_UNTAGGED", true),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CostEstimatorConfig {
    pub max_query_cost: u32,
    pub max_path_depth: u32,
    pub max_results_default: u32,
}

impl CostEstimatorConfig {
    pub fn from_env() -> Self {
        Self {
            max_query_cost: env_usize("MAX_QUERY_COST", 500) as u32,
            max_path_depth: 6,
            max_results_default: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub degree_cap: u32,
    pub high_degree_threshold: u32,
}

impl RetrievalConfig {
    pub fn from_env() -> Self {
        Self {
            degree_cap: env_usize("DEGREE_CAP", 50) as u32,
            high_degree_threshold: 200,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubgraphCacheConfig {
    pub maxsize: usize,
    pub l2_ttl: Duration,
}

impl SubgraphCacheConfig {
    pub fn from_env() -> Self {
        Self {
            maxsize: env_usize("SUBGRAPH_CACHE_MAXSIZE", 1000),
            l2_ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub sink_batch_size: usize,
    pub sync_timeout: Duration,
}

impl IngestionConfig {
    pub fn from_env() -> Self {
        let raw = env_usize("SINK_BATCH_SIZE", 500);
        Self {
            sink_batch_size: raw.clamp(100, 5000),
            sync_timeout: Duration::from_secs(env_u64("INGEST_SYNC_TIMEOUT_SECONDS", 120)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobStoreConfig {
    pub ttl: Duration,
}

impl JobStoreConfig {
    pub fn from_env() -> Self {
        Self {
            ttl: Duration::from_secs(env_u64("JOB_STORE_TTL_SECONDS", 300)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContextRankingConfig {
    pub rerank_timeout: Duration,
    pub truncation_timeout: Duration,
}

impl ContextRankingConfig {
    pub fn from_env() -> Self {
        Self {
            rerank_timeout: Duration::from_millis(env_u64("RERANK_TIMEOUT_MS", 5000)),
            truncation_timeout: Duration::from_millis(env_u64("TRUNCATION_TIMEOUT_MS", 3000)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub jitter_factor: f64,
    pub half_open_max_calls: u32,
}

impl CircuitBreakerConfig {
    pub fn from_env() -> Self {
        Self {
            failure_threshold: env_usize("CIRCUIT_FAILURE_THRESHOLD", 5) as u32,
            recovery_timeout: Duration::from_secs(env_u64("CIRCUIT_RECOVERY_TIMEOUT_SECONDS", 30)),
            jitter_factor: env_f64("CIRCUIT_JITTER_FACTOR", 0.2),
            half_open_max_calls: env_usize("CIRCUIT_HALF_OPEN_MAX_CALLS", 3) as u32,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DistributedLockConfig {
    pub ttl: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl DistributedLockConfig {
    pub fn from_env() -> Self {
        Self {
            ttl: Duration::from_secs(env_u64("LOCK_TTL_SECONDS", 30)),
            retry_attempts: env_usize("LOCK_RETRY_ATTEMPTS", 3) as u32,
            retry_delay: Duration::from_millis(env_u64("LOCK_RETRY_DELAY_MS", 100)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TenantQuotaConfig {
    pub pool_size: u32,
    pub max_tenant_fraction: f64,
}

impl TenantQuotaConfig {
    pub fn from_env() -> Self {
        Self {
            pool_size: env_usize("NEO4J_MAX_CONNECTION_POOL_SIZE", 100) as u32,
            max_tenant_fraction: env_f64("TENANT_MAX_POOL_FRACTION", 0.2),
        }
    }

    /// `max(1, floor(pool_size * fraction))`, matching the original's
    /// per-tenant connection quota derivation.
    pub fn quota(&self) -> u32 {
        let raw = (self.pool_size as f64 * self.max_tenant_fraction).floor() as u32;
        raw.max(1)
    }
}

#[derive(Debug, Clone)]
pub struct EntityResolverConfig {
    pub max_known: usize,
}

impl EntityResolverConfig {
    pub fn from_env() -> Self {
        Self {
            max_known: env_usize("ENTITY_RESOLVER_MAX_KNOWN", 100_000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VectorSyncConfig {
    pub coalesce_window: Duration,
    pub max_retries: u32,
}

impl VectorSyncConfig {
    pub fn from_env() -> Self {
        Self {
            coalesce_window: Duration::from_millis(env_u64("VECTOR_SYNC_COALESCE_WINDOW_MS", 500)),
            max_retries: env_usize("VECTOR_SYNC_MAX_RETRIES", 5) as u32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorStoreBackend {
    Memory,
    Qdrant,
}

#[derive(Debug, Clone)]
pub struct VectorStoreConfig {
    pub backend: VectorStoreBackend,
}

impl VectorStoreConfig {
    pub fn from_env() -> Self {
        let backend = match env_string("VECTOR_STORE_BACKEND", "memory").as_str() {
            "qdrant" => VectorStoreBackend::Qdrant,
            _ => VectorStoreBackend::Memory,
        };
        Self { backend }
    }
}

#[derive(Debug, Clone)]
pub struct PromptGuardrailsConfig {
    pub enabled: bool,
    pub hard_block: bool,
}

impl PromptGuardrailsConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: env_bool("PROMPT_GUARDRAILS_ENABLED", true),
            hard_block: env_bool("PROMPT_GUARDRAILS_HARD_BLOCK", false),
        }
    }
}

/// Bundle of every subsystem config, built once at startup.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub auth: AuthConfig,
    pub acl: AclConfig,
    pub cost: CostEstimatorConfig,
    pub retrieval: RetrievalConfig,
    pub subgraph_cache: SubgraphCacheConfig,
    pub ingestion: IngestionConfig,
    pub job_store: JobStoreConfig,
    pub context_ranking: ContextRankingConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub distributed_lock: DistributedLockConfig,
    pub tenant_quota: TenantQuotaConfig,
    pub entity_resolver: EntityResolverConfig,
    pub vector_sync: VectorSyncConfig,
    pub vector_store: VectorStoreConfig,
    pub prompt_guardrails: PromptGuardrailsConfig,
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        Self {
            auth: AuthConfig::from_env(),
            acl: AclConfig::from_env(),
            cost: CostEstimatorConfig::from_env(),
            retrieval: RetrievalConfig::from_env(),
            subgraph_cache: SubgraphCacheConfig::from_env(),
            ingestion: IngestionConfig::from_env(),
            job_store: JobStoreConfig::from_env(),
            context_ranking: ContextRankingConfig::from_env(),
            circuit_breaker: CircuitBreakerConfig::from_env(),
            distributed_lock: DistributedLockConfig::from_env(),
            tenant_quota: TenantQuotaConfig::from_env(),
            entity_resolver: EntityResolverConfig::from_env(),
            vector_sync: VectorSyncConfig::from_env(),
            vector_store: VectorStoreConfig::from_env(),
            prompt_guardrails: PromptGuardrailsConfig::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_batch_size_clamps_into_range() {
        std::env::set_var("SINK_BATCH_SIZE", "50");
        assert_eq!(IngestionConfig::from_env().sink_batch_size, 100);
        std::env::set_var("SINK_BATCH_SIZE", "999999");
        assert_eq!(IngestionConfig::from_env().sink_batch_size, 5000);
        std::env::remove_var("SINK_BATCH_SIZE");
    }

    #[test]
    fn tenant_quota_floors_and_has_minimum_one() {
        let cfg = TenantQuotaConfig {
            pool_size: 3,
            max_tenant_fraction: 0.1,
        };
        assert_eq!(cfg.quota(), 1);
        let cfg = TenantQuotaConfig {
            pool_size: 100,
            max_tenant_fraction: 0.2,
        };
        assert_eq!(cfg.quota(), 20);
    }
}
