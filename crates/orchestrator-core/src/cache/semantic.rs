//! Semantic query cache: keyed by query embedding rather than exact
//! text, scoped to a tenant and an ACL key so one principal's cached
//! answer never leaks to another.

use parking_lot::Mutex;

#[derive(Debug, Clone)]
pub struct SemanticCacheEntry {
    pub query: String,
    pub embedding: Vec<f32>,
    pub result: String,
    pub tenant_id: String,
    pub acl_key: String,
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

pub struct SemanticQueryCache {
    entries: Mutex<Vec<SemanticCacheEntry>>,
    similarity_threshold: f32,
}

impl SemanticQueryCache {
    #[must_use]
    pub fn new(similarity_threshold: f32) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            similarity_threshold,
        }
    }

    /// Nearest-neighbor lookup within the similarity threshold, scoped
    /// by `tenant_id` and `acl_key` so cross-tenant hits are impossible.
    #[must_use]
    pub fn get(&self, embedding: &[f32], tenant_id: &str, acl_key: &str) -> Option<String> {
        let entries = self.entries.lock();
        entries
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.acl_key == acl_key)
            .map(|e| (cosine_similarity(&e.embedding, embedding), e))
            .filter(|(sim, _)| *sim >= self.similarity_threshold)
            .max_by(|(a, _), (b, _)| a.total_cmp(b))
            .map(|(_, e)| e.result.clone())
    }

    pub fn put(&self, entry: SemanticCacheEntry) {
        self.entries.lock().push(entry);
    }

    /// Removes every cached entry for `tenant_id`.
    pub fn invalidate_tenant(&self, tenant_id: &str) {
        self.entries.lock().retain(|e| e.tenant_id != tenant_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_requires_similarity_above_threshold() {
        let cache = SemanticQueryCache::new(0.9);
        cache.put(SemanticCacheEntry {
            query: "blast radius of auth".to_string(),
            embedding: vec![1.0, 0.0],
            result: "cached-answer".to_string(),
            tenant_id: "t1".to_string(),
            acl_key: "acl-a".to_string(),
        });
        assert_eq!(cache.get(&[1.0, 0.0], "t1", "acl-a"), Some("cached-answer".to_string()));
        assert_eq!(cache.get(&[0.0, 1.0], "t1", "acl-a"), None);
    }

    #[test]
    fn hit_is_scoped_to_tenant_and_acl_key() {
        let cache = SemanticQueryCache::new(0.9);
        cache.put(SemanticCacheEntry {
            query: "q".to_string(),
            embedding: vec![1.0, 0.0],
            result: "t1-answer".to_string(),
            tenant_id: "t1".to_string(),
            acl_key: "acl-a".to_string(),
        });
        assert_eq!(cache.get(&[1.0, 0.0], "t2", "acl-a"), None);
        assert_eq!(cache.get(&[1.0, 0.0], "t1", "acl-b"), None);
    }

    #[test]
    fn invalidate_tenant_removes_only_that_tenants_entries() {
        let cache = SemanticQueryCache::new(0.9);
        cache.put(SemanticCacheEntry {
            query: "q1".to_string(),
            embedding: vec![1.0, 0.0],
            result: "a".to_string(),
            tenant_id: "t1".to_string(),
            acl_key: "acl".to_string(),
        });
        cache.put(SemanticCacheEntry {
            query: "q2".to_string(),
            embedding: vec![1.0, 0.0],
            result: "b".to_string(),
            tenant_id: "t2".to_string(),
            acl_key: "acl".to_string(),
        });
        cache.invalidate_tenant("t1");
        assert_eq!(cache.get(&[1.0, 0.0], "t1", "acl"), None);
        assert_eq!(cache.get(&[1.0, 0.0], "t2", "acl"), Some("b".to_string()));
    }
}
