//! Subgraph result cache: an LRU of `cache_key → rows`, with an
//! optional two-tier (L1 in-memory + L2 distributed) variant and a
//! reverse node index for surgical invalidation.

use crate::traits::{DistributedStore, GraphRow};
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::num::NonZeroUsize;

/// `key(cypher, acl_params)`: a fixed-length SHA-256 hex digest so the
/// cache key size never depends on the query's length or complexity.
#[must_use]
pub fn cache_key(cypher: &str, acl_params: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cypher.as_bytes());
    for (k, v) in acl_params {
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hasher.update(v.as_bytes());
        hasher.update(b";");
    }
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub maxsize: usize,
}

/// Process-local LRU cache of query results, with a reverse index from
/// node id to the set of cache keys whose result touched that node.
pub struct SubgraphCache {
    entries: Mutex<LruCache<String, Vec<GraphRow>>>,
    node_index: Mutex<HashMap<String, HashSet<String>>>,
    hits: std::sync::atomic::AtomicU64,
    misses: std::sync::atomic::AtomicU64,
    maxsize: usize,
}

impl SubgraphCache {
    #[must_use]
    pub fn new(maxsize: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(NonZeroUsize::new(maxsize.max(1)).unwrap())),
            node_index: Mutex::new(HashMap::new()),
            hits: std::sync::atomic::AtomicU64::new(0),
            misses: std::sync::atomic::AtomicU64::new(0),
            maxsize,
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Vec<GraphRow>> {
        let mut entries = self.entries.lock();
        let hit = entries.get(key).cloned();
        if hit.is_some() {
            self.hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        hit
    }

    pub fn put(&self, key: &str, rows: Vec<GraphRow>, touched_node_ids: &[String]) {
        self.entries.lock().put(key.to_string(), rows);
        if !touched_node_ids.is_empty() {
            let mut index = self.node_index.lock();
            for node_id in touched_node_ids {
                index.entry(node_id.clone()).or_default().insert(key.to_string());
            }
        }
    }

    /// Removes every cached entry whose result touched any of `nodes`.
    pub fn invalidate_by_nodes(&self, nodes: &[String]) {
        let mut index = self.node_index.lock();
        let mut entries = self.entries.lock();
        for node_id in nodes {
            if let Some(keys) = index.remove(node_id) {
                for key in keys {
                    entries.pop(&key);
                }
            }
        }
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(std::sync::atomic::Ordering::Relaxed),
            misses: self.misses.load(std::sync::atomic::Ordering::Relaxed),
            size: self.entries.lock().len(),
            maxsize: self.maxsize,
        }
    }
}

/// Two-tier cache: L1 is an in-memory `SubgraphCache`; L2 is a keyed
/// distributed store with a per-entry TTL. `get` checks L1 then L2; an
/// L2 failure degrades silently to an L1 miss rather than surfacing an
/// error to the caller.
pub struct RedisSubgraphCache {
    l1: SubgraphCache,
    l2: std::sync::Arc<dyn DistributedStore>,
    l2_ttl_secs: u64,
    key_prefix: String,
}

impl RedisSubgraphCache {
    pub fn new(maxsize: usize, l2: std::sync::Arc<dyn DistributedStore>, l2_ttl_secs: u64) -> Self {
        Self {
            l1: SubgraphCache::new(maxsize),
            l2,
            l2_ttl_secs,
            key_prefix: "subgraph:".to_string(),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Vec<GraphRow>> {
        if let Some(rows) = self.l1.get(key) {
            return Some(rows);
        }
        let l2_key = format!("{}{key}", self.key_prefix);
        match self.l2.get(&l2_key).await {
            Ok(Some(serialized)) => serde_json::from_str(&serialized).ok(),
            _ => None,
        }
    }

    pub async fn put(&self, key: &str, rows: Vec<GraphRow>, touched_node_ids: &[String]) {
        self.l1.put(key, rows.clone(), touched_node_ids);
        if let Ok(serialized) = serde_json::to_string(&rows) {
            let l2_key = format!("{}{key}", self.key_prefix);
            let _ = self.l2.set_nx_ex(&l2_key, &serialized, self.l2_ttl_secs).await;
        }
    }

    pub fn invalidate_by_nodes(&self, nodes: &[String]) {
        self.l1.invalidate_by_nodes(nodes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_fixed_length_hex() {
        let short = cache_key("MATCH (n) RETURN n", &BTreeMap::new());
        let mut long_params = BTreeMap::new();
        long_params.insert("acl_team".to_string(), "x".repeat(10_000));
        let long = cache_key(&"MATCH (n) RETURN n".repeat(1000), &long_params);
        assert_eq!(short.len(), 64);
        assert_eq!(long.len(), 64);
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let cache = SubgraphCache::new(2);
        cache.put("a", vec![], &[]);
        cache.put("b", vec![], &[]);
        cache.get("a"); // touch a, making b the LRU victim
        cache.put("c", vec![], &[]);
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().size, 2);
    }

    #[test]
    fn invalidate_by_nodes_removes_touching_entries() {
        let cache = SubgraphCache::new(10);
        cache.put("q1", vec![], &["node-a".to_string()]);
        cache.put("q2", vec![], &["node-b".to_string()]);
        cache.invalidate_by_nodes(&["node-a".to_string()]);
        assert!(cache.get("q1").is_none());
        assert!(cache.get("q2").is_some());
    }

    #[tokio::test]
    async fn l2_failure_degrades_silently_to_l1_miss() {
        use crate::error::{OrchestratorError, Result};
        use async_trait::async_trait;

        struct FailingStore;
        #[async_trait]
        impl DistributedStore for FailingStore {
            async fn get(&self, _key: &str) -> Result<Option<String>> {
                Err(OrchestratorError::DistributedStore("down".into()))
            }
            async fn set_nx_ex(&self, _key: &str, _value: &str, _ttl_secs: u64) -> Result<bool> {
                Err(OrchestratorError::DistributedStore("down".into()))
            }
            async fn compare_and_delete(&self, _key: &str, _expected_value: &str) -> Result<bool> {
                Ok(false)
            }
            async fn delete(&self, _key: &str) -> Result<bool> {
                Ok(false)
            }
            async fn delete_prefix(&self, _prefix: &str) -> Result<u64> {
                Ok(0)
            }
            async fn zadd(&self, _key: &str, _member: &str, _score: f64) -> Result<()> {
                Ok(())
            }
            async fn zremrangebyscore(&self, _key: &str, _min: f64, _max: f64) -> Result<u64> {
                Ok(0)
            }
            async fn zcard(&self, _key: &str) -> Result<u64> {
                Ok(0)
            }
            async fn zrem(&self, _key: &str, _member: &str) -> Result<bool> {
                Ok(false)
            }
        }

        let cache = RedisSubgraphCache::new(10, std::sync::Arc::new(FailingStore), 60);
        assert!(cache.get("missing").await.is_none());
    }
}
