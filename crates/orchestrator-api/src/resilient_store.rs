//! Circuit-breaker decorators around the store trait objects.
//!
//! `execute_read`/`execute_write` and the vector-store methods don't
//! carry a tenant id in their signature, so these wrap every call in
//! the provider-wide breaker rather than a per-tenant one; ingestion's
//! tenant-scoped path gets per-tenant breaking directly from
//! `CircuitBreakerRegistry::for_tenant` where a tenant id is already in
//! hand.

use async_trait::async_trait;
use orchestrator_core::error::Result;
use orchestrator_core::model::{SearchResult, VectorRecord};
use orchestrator_core::resilience::CircuitBreakerRegistry;
use orchestrator_core::traits::{GraphRow, GraphStore, VectorStore};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct ResilientGraphStore {
    inner: Arc<dyn GraphStore>,
    breakers: Arc<CircuitBreakerRegistry>,
}

impl ResilientGraphStore {
    pub fn new(inner: Arc<dyn GraphStore>, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self { inner, breakers }
    }
}

#[async_trait]
impl GraphStore for ResilientGraphStore {
    async fn execute_read(&self, cypher: &str, params: BTreeMap<String, Value>) -> Result<Vec<GraphRow>> {
        let breaker = self.breakers.global().await;
        let inner = self.inner.clone();
        let cypher = cypher.to_string();
        breaker.call(|| async move { inner.execute_read(&cypher, params).await }).await
    }

    async fn execute_write(&self, cypher: &str, params: BTreeMap<String, Value>) -> Result<Vec<GraphRow>> {
        let breaker = self.breakers.global().await;
        let inner = self.inner.clone();
        let cypher = cypher.to_string();
        breaker.call(|| async move { inner.execute_write(&cypher, params).await }).await
    }
}

pub struct ResilientVectorStore {
    inner: Arc<dyn VectorStore>,
    breakers: Arc<CircuitBreakerRegistry>,
}

impl ResilientVectorStore {
    pub fn new(inner: Arc<dyn VectorStore>, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self { inner, breakers }
    }
}

#[async_trait]
impl VectorStore for ResilientVectorStore {
    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> Result<usize> {
        let breaker = self.breakers.global().await;
        let inner = self.inner.clone();
        let collection = collection.to_string();
        breaker.call(|| async move { inner.upsert(&collection, records).await }).await
    }

    async fn search(&self, collection: &str, query: Vec<f32>, limit: usize) -> Result<Vec<SearchResult>> {
        let breaker = self.breakers.global().await;
        let inner = self.inner.clone();
        let collection = collection.to_string();
        breaker.call(|| async move { inner.search(&collection, query, limit).await }).await
    }

    async fn delete(&self, collection: &str, ids: Vec<String>, tenant_id: Option<&str>) -> Result<usize> {
        let breaker = self.breakers.global().await;
        let inner = self.inner.clone();
        let collection = collection.to_string();
        let tenant_id = tenant_id.map(str::to_string);
        breaker
            .call(|| async move { inner.delete(&collection, ids, tenant_id.as_deref()).await })
            .await
    }
}
