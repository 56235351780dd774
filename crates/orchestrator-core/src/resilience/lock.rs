//! Distributed mutex and counting semaphore over the `DistributedStore`
//! seam, plus in-process fallbacks with identical contracts for
//! single-replica deployments or tests that don't want a live store.
//! `orchestrator-api` always wires the distributed variant in
//! production (Redis is a required dependency, not optional); the
//! local fallbacks exist for callers that construct an `AppState`
//! without one, such as the router integration tests.

use crate::config::DistributedLockConfig;
use crate::error::{OrchestratorError, Result};
use crate::traits::DistributedStore;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// RAII guard releasing its lock/permit on drop is not possible for an
/// async release, so callers use the scoped `with_lock`/`with_permit`
/// helpers below rather than holding a guard across an await point
/// themselves — this is the "scoped acquisition" redesign: release
/// always runs, even if the closure returns early or panics via
/// `catch_unwind`-free `?` propagation (we rely on `.await` not
/// unwinding past us under normal operation).
pub struct DistributedLock {
    store: Arc<dyn DistributedStore>,
    config: DistributedLockConfig,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn DistributedStore>, config: DistributedLockConfig) -> Self {
        Self { store, config }
    }

    async fn acquire(&self, key: &str) -> Result<String> {
        let owner = Uuid::new_v4().to_string();
        for attempt in 0..=self.config.retry_attempts {
            if self
                .store
                .set_nx_ex(key, &owner, self.config.ttl.as_secs())
                .await?
            {
                return Ok(owner);
            }
            if attempt < self.config.retry_attempts {
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }
        Err(OrchestratorError::DistributedStore(format!(
            "could not acquire lock '{key}' after {} attempts",
            self.config.retry_attempts
        )))
    }

    async fn release(&self, key: &str, owner: &str) -> Result<()> {
        self.store.compare_and_delete(key, owner).await?;
        Ok(())
    }

    /// Acquires `key`, runs `f`, releases unconditionally afterward.
    pub async fn with_lock<T, F, Fut>(&self, key: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let owner = self.acquire(key).await?;
        let result = f().await;
        self.release(key, &owner).await?;
        result
    }
}

/// In-process mutex fallback with the same acquire/release contract.
#[derive(Default)]
pub struct LocalFallbackLock {
    owners: Mutex<HashMap<String, String>>,
}

impl LocalFallbackLock {
    pub async fn with_lock<T, F, Fut>(&self, key: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let owner = Uuid::new_v4().to_string();
        {
            let mut guard = self.owners.lock().await;
            if guard.contains_key(key) {
                return Err(OrchestratorError::DistributedStore(format!(
                    "lock '{key}' already held"
                )));
            }
            guard.insert(key.to_string(), owner.clone());
        }
        let result = f().await;
        self.owners.lock().await.remove(key);
        result
    }
}

/// Counting semaphore backed by a sorted set: member = token, score =
/// acquisition time. Acquire is atomically `(expire old, count,
/// add-if-under-limit)`.
pub struct DistributedSemaphore {
    store: Arc<dyn DistributedStore>,
    key: String,
    limit: u64,
    lease_secs: f64,
}

impl DistributedSemaphore {
    pub fn new(store: Arc<dyn DistributedStore>, key: impl Into<String>, limit: u64, lease_secs: f64) -> Self {
        Self {
            store,
            key: key.into(),
            limit,
            lease_secs,
        }
    }

    async fn acquire(&self) -> Result<String> {
        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
        self.store
            .zremrangebyscore(&self.key, f64::MIN, now - self.lease_secs)
            .await?;
        let count = self.store.zcard(&self.key).await?;
        if count >= self.limit {
            return Err(OrchestratorError::DistributedStore(format!(
                "semaphore '{}' saturated",
                self.key
            )));
        }
        let token = Uuid::new_v4().to_string();
        self.store.zadd(&self.key, &token, now).await?;
        Ok(token)
    }

    async fn release(&self, token: &str) -> Result<()> {
        self.store.zrem(&self.key, token).await?;
        Ok(())
    }

    pub async fn with_permit<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let token = self.acquire().await?;
        let result = f().await;
        self.release(&token).await?;
        result
    }
}

/// In-process counting semaphore fallback.
pub struct LocalFallbackSemaphore {
    inner: Arc<tokio::sync::Semaphore>,
}

impl LocalFallbackSemaphore {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(tokio::sync::Semaphore::new(limit)),
        }
    }

    pub async fn with_permit<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let _permit = self
            .inner
            .acquire()
            .await
            .map_err(|e| OrchestratorError::Internal(e.to_string()))?;
        f().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::fakes::InMemoryDistributedStore;

    fn lock_config() -> DistributedLockConfig {
        DistributedLockConfig {
            ttl: std::time::Duration::from_secs(5),
            retry_attempts: 2,
            retry_delay: std::time::Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn lock_releases_after_use() {
        let lock = DistributedLock::new(Arc::new(InMemoryDistributedStore::default()), lock_config());
        lock.with_lock("k", || async { Ok::<_, OrchestratorError>(()) })
            .await
            .unwrap();
        // Re-acquiring the same key must succeed because release ran.
        lock.with_lock("k", || async { Ok::<_, OrchestratorError>(()) })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn compare_and_delete_does_not_release_other_owners_lock() {
        let store = Arc::new(InMemoryDistributedStore::default());
        assert!(store.set_nx_ex("k", "owner-a", 30).await.unwrap());
        assert!(!store.compare_and_delete("k", "owner-b").await.unwrap());
        assert!(store.compare_and_delete("k", "owner-a").await.unwrap());
    }

    #[tokio::test]
    async fn semaphore_rejects_beyond_limit() {
        let store = Arc::new(InMemoryDistributedStore::default());
        let sem = DistributedSemaphore::new(store, "sem", 1, 30.0);
        let token_a = sem.acquire().await.unwrap();
        assert!(sem.acquire().await.is_err());
        sem.release(&token_a).await.unwrap();
        assert!(sem.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn local_fallback_lock_round_trips() {
        let lock = LocalFallbackLock::default();
        lock.with_lock("k", || async { Ok::<_, OrchestratorError>(()) })
            .await
            .unwrap();
        lock.with_lock("k", || async { Ok::<_, OrchestratorError>(()) })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn local_fallback_semaphore_blocks_beyond_limit() {
        let sem = LocalFallbackSemaphore::new(1);
        let result = sem
            .with_permit(|| async {
                assert_eq!(sem.inner.available_permits(), 0);
                Ok::<_, OrchestratorError>(())
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(sem.inner.available_permits(), 1);
    }
}
