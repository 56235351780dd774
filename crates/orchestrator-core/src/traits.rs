//! Capability interfaces at every external seam: graph store, vector
//! store, distributed key-value store, LLM/embedding clients. Concrete
//! adapters live in the sibling `orchestrator-neo4j`/`orchestrator-
//! qdrant`/`orchestrator-redis` crates; in-memory fakes live alongside
//! each trait here for tests.

use crate::error::Result;
use crate::model::{CircuitStateSnapshot, SearchResult, VectorRecord};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

/// A single row of a Cypher result set: column name → value.
pub type GraphRow = BTreeMap<String, Value>;

/// Async session over the graph database. Mirrors the neo4rs
/// `execute_read`/`execute_write` split so callers state their intent
/// and the driver can route reads to replicas.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn execute_read(&self, cypher: &str, params: BTreeMap<String, Value>) -> Result<Vec<GraphRow>>;
    async fn execute_write(&self, cypher: &str, params: BTreeMap<String, Value>) -> Result<Vec<GraphRow>>;
}

/// Vector store seam: upsert, similarity search, delete. Tenant-scoped
/// delete must report the actual number removed, not the input size.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> Result<usize>;
    async fn search(&self, collection: &str, query: Vec<f32>, limit: usize) -> Result<Vec<SearchResult>>;
    async fn delete(&self, collection: &str, ids: Vec<String>, tenant_id: Option<&str>) -> Result<usize>;
}

/// Generic async key-value store backing distributed locks, semaphores,
/// circuit-breaker state, and the durable outbox. A single abstraction
/// covers all of them because each need is `(get, set-with-ttl,
/// compare-and-delete, sorted-set ops)` over a Redis-shaped store.
#[async_trait]
pub trait DistributedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool>;
    async fn compare_and_delete(&self, key: &str, expected_value: &str) -> Result<bool>;
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;

    /// Sorted-set add with score; used by the semaphore implementation.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()>;
    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<u64>;
    async fn zcard(&self, key: &str) -> Result<u64>;
    async fn zrem(&self, key: &str, member: &str) -> Result<bool>;
}

/// Circuit breaker state persistence. `InMemoryStateStore` is process-
/// local; a distributed implementation lives in `orchestrator-redis`.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, breaker_name: &str) -> Result<Option<CircuitStateSnapshot>>;
    async fn save(&self, breaker_name: &str, snapshot: &CircuitStateSnapshot) -> Result<()>;
}

/// One message turn sent to an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmMessage {
    pub role: &'static str,
    pub content: String,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn name(&self) -> &str;
    async fn ainvoke_messages(&self, messages: &[LlmMessage]) -> Result<String>;
}

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// A durable record of one outbox event, persisted across a process
/// restart.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn write_event(&self, event: &crate::model::VectorSyncEvent) -> Result<()>;
    async fn load_pending(&self) -> Result<Vec<crate::model::VectorSyncEvent>>;
    async fn remove(&self, event_id: &str) -> Result<()>;
}

#[cfg(test)]
pub mod fakes {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// In-process `DistributedStore` fake for resilience/outbox tests.
    #[derive(Default)]
    pub struct InMemoryDistributedStore {
        strings: Mutex<HashMap<String, String>>,
        sorted_sets: Mutex<HashMap<String, Vec<(String, f64)>>>,
    }

    #[async_trait]
    impl DistributedStore for InMemoryDistributedStore {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            Ok(self.strings.lock().get(key).cloned())
        }

        async fn set_nx_ex(&self, key: &str, value: &str, _ttl_secs: u64) -> Result<bool> {
            let mut guard = self.strings.lock();
            if guard.contains_key(key) {
                return Ok(false);
            }
            guard.insert(key.to_string(), value.to_string());
            Ok(true)
        }

        async fn compare_and_delete(&self, key: &str, expected_value: &str) -> Result<bool> {
            let mut guard = self.strings.lock();
            if guard.get(key).map(String::as_str) == Some(expected_value) {
                guard.remove(key);
                return Ok(true);
            }
            Ok(false)
        }

        async fn delete(&self, key: &str) -> Result<bool> {
            Ok(self.strings.lock().remove(key).is_some())
        }

        async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
            let mut guard = self.strings.lock();
            let before = guard.len();
            guard.retain(|k, _| !k.starts_with(prefix));
            Ok((before - guard.len()) as u64)
        }

        async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
            let mut guard = self.sorted_sets.lock();
            let set = guard.entry(key.to_string()).or_default();
            set.retain(|(m, _)| m != member);
            set.push((member.to_string(), score));
            Ok(())
        }

        async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<u64> {
            let mut guard = self.sorted_sets.lock();
            let Some(set) = guard.get_mut(key) else {
                return Ok(0);
            };
            let before = set.len();
            set.retain(|(_, score)| *score < min || *score > max);
            Ok((before - set.len()) as u64)
        }

        async fn zcard(&self, key: &str) -> Result<u64> {
            Ok(self.sorted_sets.lock().get(key).map_or(0, |s| s.len() as u64))
        }

        async fn zrem(&self, key: &str, member: &str) -> Result<bool> {
            let mut guard = self.sorted_sets.lock();
            let Some(set) = guard.get_mut(key) else {
                return Ok(false);
            };
            let before = set.len();
            set.retain(|(m, _)| m != member);
            Ok(set.len() != before)
        }
    }
}
