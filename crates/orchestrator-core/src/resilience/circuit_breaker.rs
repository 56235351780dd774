//! Three-state circuit breaker (CLOSED/OPEN/HALF_OPEN) with jittered
//! recovery and pluggable state persistence, per-tenant registries
//! sharing one global provider breaker.

use crate::config::CircuitBreakerConfig;
use crate::error::{OrchestratorError, Result};
use crate::model::{CircuitState, CircuitStateSnapshot};
use crate::traits::StateStore;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

/// A single named circuit breaker. State mutation happens behind an
/// internal async lock so concurrent callers serialize on the
/// transition logic, not on the protected call itself.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    store: Arc<dyn StateStore>,
    snapshot: AsyncMutex<CircuitStateSnapshot>,
}

impl CircuitBreaker {
    pub async fn new(name: impl Into<String>, config: CircuitBreakerConfig, store: Arc<dyn StateStore>) -> Self {
        let name = name.into();
        let snapshot = store.load(&name).await.ok().flatten().unwrap_or_default();
        Self {
            name,
            config,
            store,
            snapshot: AsyncMutex::new(snapshot),
        }
    }

    /// Recovery timeout jittered by `±jitter_factor`, so N breakers
    /// sharing a config do not all recover on the same tick.
    fn jittered_recovery(&self) -> chrono::Duration {
        let jitter = self.config.jitter_factor;
        let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
        let secs = (self.config.recovery_timeout.as_secs_f64() * factor).max(0.0);
        chrono::Duration::milliseconds((secs * 1000.0) as i64)
    }

    /// Returns `Ok(())` if a call is currently permitted, transitioning
    /// OPEN → HALF_OPEN when the jittered recovery window has elapsed.
    pub async fn check(&self) -> Result<()> {
        let mut snap = self.snapshot.lock().await;
        match snap.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => {
                if snap.half_open_calls < self.config.half_open_max_calls {
                    snap.half_open_calls += 1;
                    self.store.save(&self.name, &snap).await?;
                    Ok(())
                } else {
                    Err(OrchestratorError::CircuitOpen {
                        breaker: self.name.clone(),
                        retry_after_secs: self.config.recovery_timeout.as_secs(),
                    })
                }
            }
            CircuitState::Open => {
                let elapsed = snap
                    .last_failure_time
                    .map(|t| Utc::now() - t)
                    .unwrap_or(chrono::Duration::zero());
                if elapsed >= self.jittered_recovery() {
                    snap.state = CircuitState::HalfOpen;
                    snap.half_open_calls = 1;
                    self.store.save(&self.name, &snap).await?;
                    Ok(())
                } else {
                    Err(OrchestratorError::CircuitOpen {
                        breaker: self.name.clone(),
                        retry_after_secs: self.config.recovery_timeout.as_secs(),
                    })
                }
            }
        }
    }

    pub async fn record_success(&self) -> Result<()> {
        let mut snap = self.snapshot.lock().await;
        snap.state = CircuitState::Closed;
        snap.failure_count = 0;
        snap.half_open_calls = 0;
        self.store.save(&self.name, &snap).await
    }

    pub async fn record_failure(&self) -> Result<()> {
        let mut snap = self.snapshot.lock().await;
        match snap.state {
            CircuitState::HalfOpen => {
                snap.state = CircuitState::Open;
                snap.last_failure_time = Some(Utc::now());
                snap.half_open_calls = 0;
            }
            CircuitState::Closed => {
                snap.failure_count += 1;
                if snap.failure_count >= self.config.failure_threshold {
                    snap.state = CircuitState::Open;
                    snap.last_failure_time = Some(Utc::now());
                }
            }
            CircuitState::Open => {
                snap.last_failure_time = Some(Utc::now());
            }
        }
        self.store.save(&self.name, &snap).await
    }

    pub async fn snapshot(&self) -> CircuitStateSnapshot {
        self.snapshot.lock().await.clone()
    }

    /// Runs `f` behind the breaker: checks, awaits, records success or
    /// failure based on the `Result` returned.
    pub async fn call<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.check().await?;
        match f().await {
            Ok(value) => {
                self.record_success().await?;
                Ok(value)
            }
            Err(err) => {
                self.record_failure().await?;
                Err(err)
            }
        }
    }
}

/// Process-local `StateStore`. Used directly in tests and as the
/// default when no distributed store is configured.
#[derive(Default)]
pub struct InMemoryStateStore {
    snapshots: Mutex<std::collections::HashMap<String, CircuitStateSnapshot>>,
}

#[async_trait::async_trait]
impl StateStore for InMemoryStateStore {
    async fn load(&self, breaker_name: &str) -> Result<Option<CircuitStateSnapshot>> {
        Ok(self.snapshots.lock().get(breaker_name).cloned())
    }

    async fn save(&self, breaker_name: &str, snapshot: &CircuitStateSnapshot) -> Result<()> {
        self.snapshots
            .lock()
            .insert(breaker_name.to_string(), snapshot.clone());
        Ok(())
    }
}

/// Per-tenant breaker registry sharing a single store, plus a global
/// provider-wide breaker that a provider-wide outage trips regardless
/// of any individual tenant's state.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    store: Arc<dyn StateStore>,
    per_tenant: DashMap<String, Arc<CircuitBreaker>>,
    global: AsyncMutex<Option<Arc<CircuitBreaker>>>,
    provider: String,
}

impl CircuitBreakerRegistry {
    pub fn new(provider: impl Into<String>, config: CircuitBreakerConfig, store: Arc<dyn StateStore>) -> Self {
        Self {
            config,
            store,
            per_tenant: DashMap::new(),
            global: AsyncMutex::new(None),
            provider: provider.into(),
        }
    }

    pub async fn for_tenant(&self, tenant_id: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.per_tenant.get(tenant_id) {
            return existing.clone();
        }
        let name = format!("{}:{tenant_id}", self.provider);
        let breaker = Arc::new(CircuitBreaker::new(name, self.config.clone(), self.store.clone()).await);
        self.per_tenant.insert(tenant_id.to_string(), breaker.clone());
        breaker
    }

    pub async fn global(&self) -> Arc<CircuitBreaker> {
        let mut guard = self.global.lock().await;
        if let Some(existing) = guard.as_ref() {
            return existing.clone();
        }
        let name = format!("{}:__global__", self.provider);
        let breaker = Arc::new(CircuitBreaker::new(name, self.config.clone(), self.store.clone()).await);
        *guard = Some(breaker.clone());
        breaker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: std::time::Duration::from_millis(20),
            jitter_factor: 0.0,
            half_open_max_calls: 1,
        }
    }

    #[tokio::test]
    async fn closed_breaker_permits_calls() {
        let breaker = CircuitBreaker::new("test", config(), Arc::new(InMemoryStateStore::default())).await;
        assert!(breaker.check().await.is_ok());
    }

    #[tokio::test]
    async fn opens_after_failure_threshold() {
        let breaker = CircuitBreaker::new("test", config(), Arc::new(InMemoryStateStore::default())).await;
        breaker.record_failure().await.unwrap();
        breaker.record_failure().await.unwrap();
        let err = breaker.check().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::CircuitOpen { .. }));
    }

    #[tokio::test]
    async fn transitions_to_half_open_after_recovery_timeout() {
        let breaker = CircuitBreaker::new("test", config(), Arc::new(InMemoryStateStore::default())).await;
        breaker.record_failure().await.unwrap();
        breaker.record_failure().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(40)).await;
        assert!(breaker.check().await.is_ok());
        assert_eq!(breaker.snapshot().await.state, CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("test", config(), Arc::new(InMemoryStateStore::default())).await;
        breaker.record_failure().await.unwrap();
        breaker.record_failure().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(40)).await;
        breaker.check().await.unwrap();
        breaker.record_failure().await.unwrap();
        assert_eq!(breaker.snapshot().await.state, CircuitState::Open);
    }

    #[tokio::test]
    async fn half_open_success_closes_and_resets() {
        let breaker = CircuitBreaker::new("test", config(), Arc::new(InMemoryStateStore::default())).await;
        breaker.record_failure().await.unwrap();
        breaker.record_failure().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(40)).await;
        breaker.check().await.unwrap();
        breaker.record_success().await.unwrap();
        let snap = breaker.snapshot().await;
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failure_count, 0);
    }

    #[tokio::test]
    async fn registry_gives_distinct_breakers_per_tenant() {
        let registry = CircuitBreakerRegistry::new("neo4j", config(), Arc::new(InMemoryStateStore::default()));
        let a = registry.for_tenant("t1").await;
        let b = registry.for_tenant("t2").await;
        a.record_failure().await.unwrap();
        a.record_failure().await.unwrap();
        assert!(a.check().await.is_err());
        assert!(b.check().await.is_ok());
    }

    #[tokio::test]
    async fn jitter_produces_nonzero_variance_across_breakers() {
        let jittered_config = CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: std::time::Duration::from_secs(10),
            jitter_factor: 0.5,
            half_open_max_calls: 1,
        };
        let mut recoveries = Vec::new();
        for _ in 0..5 {
            let breaker =
                CircuitBreaker::new("jitter", jittered_config.clone(), Arc::new(InMemoryStateStore::default()))
                    .await;
            recoveries.push(breaker.jittered_recovery());
        }
        let first = recoveries[0];
        assert!(recoveries.iter().any(|r| *r != first));
    }
}
