//! Multi-tenancy enforcement: tenant routing, per-tenant connection
//! quotas, and read-replica-aware dispatch. Tenant context resolution
//! (JWT decode → `SecurityPrincipal`) lives in `auth.rs` in the edge
//! crate; this module covers what happens once a tenant id is known.

use crate::config::TenantQuotaConfig;
use crate::error::{OrchestratorError, Result};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationMode {
    /// Routes to a dedicated database name.
    Physical,
    /// Shares the default database, scoped by `tenant_id` predicates.
    Logical,
}

#[derive(Debug, Clone)]
pub struct TenantConfig {
    pub isolation_mode: IsolationMode,
    pub database_name: String,
}

/// Explicit tenant → routing config registry. Fail-closed: an
/// unregistered tenant is never silently routed to the default
/// database.
#[derive(Default)]
pub struct TenantRegistry {
    tenants: DashMap<String, TenantConfig>,
}

impl TenantRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tenant_id: &str, config: TenantConfig) {
        self.tenants.insert(tenant_id.to_string(), config);
    }

    #[must_use]
    pub fn get(&self, tenant_id: &str) -> Option<TenantConfig> {
        self.tenants.get(tenant_id).map(|c| c.clone())
    }
}

/// Resolves the database name to route to for `tenant_id`.
/// `PHYSICAL` isolation returns the tenant's dedicated database name;
/// `LOGICAL` returns `default_database` (the caller still applies
/// tenant_id predicates downstream).
pub struct TenantRouter {
    registry: Arc<TenantRegistry>,
    default_database: String,
}

impl TenantRouter {
    #[must_use]
    pub fn new(registry: Arc<TenantRegistry>, default_database: String) -> Self {
        Self { registry, default_database }
    }

    pub fn resolve_database(&self, tenant_id: &str) -> Result<String> {
        let config = self
            .registry
            .get(tenant_id)
            .ok_or_else(|| OrchestratorError::UnknownTenant(tenant_id.to_string()))?;
        Ok(match config.isolation_mode {
            IsolationMode::Physical => config.database_name,
            IsolationMode::Logical => self.default_database.clone(),
        })
    }
}

/// Caps each tenant at `max(1, floor(pool_size * fraction))` concurrent
/// connections. `acquire` over quota raises [`OrchestratorError::TenantQuotaExceeded`].
pub struct TenantConnectionTracker {
    max_per_tenant: u32,
    active: AsyncMutex<std::collections::HashMap<String, u32>>,
}

impl TenantConnectionTracker {
    #[must_use]
    pub fn new(pool_size: u32, max_tenant_fraction: f64) -> Self {
        let max_per_tenant = ((pool_size as f64) * max_tenant_fraction).floor() as u32;
        Self {
            max_per_tenant: max_per_tenant.max(1),
            active: AsyncMutex::new(std::collections::HashMap::new()),
        }
    }

    #[must_use]
    pub fn from_config(config: &TenantQuotaConfig) -> Self {
        Self::new(config.pool_size, config.max_tenant_fraction)
    }

    #[must_use]
    pub fn max_per_tenant(&self) -> u32 {
        self.max_per_tenant
    }

    pub async fn active_count(&self, tenant_id: &str) -> u32 {
        *self.active.lock().await.get(tenant_id).unwrap_or(&0)
    }

    pub async fn acquire(&self, tenant_id: &str) -> Result<()> {
        let mut active = self.active.lock().await;
        let current = *active.get(tenant_id).unwrap_or(&0);
        if current >= self.max_per_tenant {
            return Err(OrchestratorError::TenantQuotaExceeded {
                tenant_id: tenant_id.to_string(),
            });
        }
        active.insert(tenant_id.to_string(), current + 1);
        Ok(())
    }

    pub async fn release(&self, tenant_id: &str) {
        let mut active = self.active.lock().await;
        match active.get(tenant_id).copied() {
            Some(current) if current <= 1 => {
                active.remove(tenant_id);
            }
            Some(current) => {
                active.insert(tenant_id.to_string(), current - 1);
            }
            None => {}
        }
    }

    /// RAII-style scoped acquisition: releases automatically when the
    /// returned guard is dropped, matching the "scoped acquisition"
    /// pattern used for locks and semaphores elsewhere in this crate.
    pub async fn acquire_scoped<'a>(
        self: &'a Arc<Self>,
        tenant_id: &str,
    ) -> Result<TenantConnectionGuard<'a>> {
        self.acquire(tenant_id).await?;
        Ok(TenantConnectionGuard { tracker: self, tenant_id: tenant_id.to_string() })
    }
}

pub struct TenantConnectionGuard<'a> {
    tracker: &'a Arc<TenantConnectionTracker>,
    tenant_id: String,
}

impl Drop for TenantConnectionGuard<'_> {
    fn drop(&mut self) {
        let tracker = self.tracker.clone();
        let tenant_id = self.tenant_id.clone();
        tokio::spawn(async move {
            tracker.release(&tenant_id).await;
        });
    }
}

/// Round-robins reads across configured replica handles; writes always
/// target the primary. Generic over a handle type `H` so it works
/// whether `H` is a `neo4rs::Graph` or any other driver handle the
/// graph-store adapter wraps.
pub struct ReplicaAwarePool<H> {
    primary: H,
    replicas: Vec<H>,
    index: AtomicU32,
}

impl<H: Clone> ReplicaAwarePool<H> {
    #[must_use]
    pub fn new(primary: H, replicas: Vec<H>) -> Self {
        Self { primary, replicas, index: AtomicU32::new(0) }
    }

    #[must_use]
    pub fn read_handle(&self) -> H {
        if self.replicas.is_empty() {
            return self.primary.clone();
        }
        let i = self.index.fetch_add(1, Ordering::Relaxed) as usize % self.replicas.len();
        self.replicas[i].clone()
    }

    #[must_use]
    pub fn write_handle(&self) -> H {
        self.primary.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical_isolation_routes_to_dedicated_database() {
        let registry = Arc::new(TenantRegistry::new());
        registry.register(
            "tenant-a",
            TenantConfig { isolation_mode: IsolationMode::Physical, database_name: "tenant_a_db".to_string() },
        );
        let router = TenantRouter::new(registry, "shared".to_string());
        assert_eq!(router.resolve_database("tenant-a").unwrap(), "tenant_a_db");
    }

    #[test]
    fn logical_isolation_routes_to_default_database() {
        let registry = Arc::new(TenantRegistry::new());
        registry.register(
            "tenant-b",
            TenantConfig { isolation_mode: IsolationMode::Logical, database_name: "ignored".to_string() },
        );
        let router = TenantRouter::new(registry, "shared".to_string());
        assert_eq!(router.resolve_database("tenant-b").unwrap(), "shared");
    }

    #[test]
    fn unregistered_tenant_fails_closed() {
        let registry = Arc::new(TenantRegistry::new());
        let router = TenantRouter::new(registry, "shared".to_string());
        assert!(router.resolve_database("ghost").is_err());
    }

    #[tokio::test]
    async fn quota_exceeded_raises_after_max_per_tenant() {
        let tracker = TenantConnectionTracker::new(10, 0.2);
        assert_eq!(tracker.max_per_tenant(), 2);
        tracker.acquire("t1").await.unwrap();
        tracker.acquire("t1").await.unwrap();
        assert!(tracker.acquire("t1").await.is_err());
    }

    #[tokio::test]
    async fn release_frees_a_slot() {
        let tracker = TenantConnectionTracker::new(10, 0.2);
        tracker.acquire("t1").await.unwrap();
        tracker.acquire("t1").await.unwrap();
        tracker.release("t1").await;
        assert!(tracker.acquire("t1").await.is_ok());
    }

    #[test]
    fn replica_pool_round_robins_reads_and_pins_writes() {
        let pool = ReplicaAwarePool::new("primary", vec!["r1", "r2"]);
        assert_eq!(pool.read_handle(), "r1");
        assert_eq!(pool.read_handle(), "r2");
        assert_eq!(pool.read_handle(), "r1");
        assert_eq!(pool.write_handle(), "primary");
    }

    #[test]
    fn replica_pool_falls_back_to_primary_with_no_replicas() {
        let pool: ReplicaAwarePool<&str> = ReplicaAwarePool::new("primary", vec![]);
        assert_eq!(pool.read_handle(), "primary");
    }
}
