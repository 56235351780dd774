//! Entity resolution: exact composite-key matching only. Two distinct
//! names in the same namespace are always distinct entities — no
//! fuzzy matching, no edit-distance scoring. An alias registry maps
//! known synonyms onto a canonical name before the composite key is
//! built; known entities are kept in a bounded LRU so memory stays
//! constant regardless of corpus size.

use crate::model::ScopedEntityId;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntity {
    pub id: ScopedEntityId,
    pub is_new: bool,
}

pub struct EntityResolver {
    aliases: Mutex<std::collections::HashMap<String, String>>,
    known: Mutex<LruCache<ScopedEntityId, ()>>,
}

impl EntityResolver {
    #[must_use]
    pub fn new(max_known: usize) -> Self {
        Self {
            aliases: Mutex::new(std::collections::HashMap::new()),
            known: Mutex::new(LruCache::new(
                NonZeroUsize::new(max_known.max(1)).unwrap(),
            )),
        }
    }

    /// Registers `alias` as a synonym for `canonical_name` within a
    /// given repository/namespace scope lookup (applied at resolve time).
    pub fn register_alias(&self, alias: &str, canonical_name: &str) {
        self.aliases
            .lock()
            .insert(alias.to_string(), canonical_name.to_string());
    }

    fn canonicalize(&self, name: &str) -> String {
        self.aliases
            .lock()
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// Resolves `(repository, namespace, name)` to a composite scoped
    /// id. Idempotent: resolving the same inputs twice returns the same
    /// id, with `is_new = false` on the second call.
    pub fn resolve(&self, repository: &str, namespace: &str, name: &str) -> ResolvedEntity {
        let canonical = self.canonicalize(name);
        let id = ScopedEntityId::new(repository, namespace, &canonical);

        let mut known = self.known.lock();
        let is_new = known.get(&id).is_none();
        known.put(id.clone(), ());

        ResolvedEntity { id, is_new }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_similar_names_resolve_to_distinct_ids() {
        let resolver = EntityResolver::new(100);
        let a = resolver.resolve("repo", "ns", "payment-service");
        let b = resolver.resolve("repo", "ns", "payments-service");
        assert_ne!(a.id, b.id);
        assert!(a.is_new);
        assert!(b.is_new);
    }

    #[test]
    fn resolve_is_idempotent_for_same_inputs() {
        let resolver = EntityResolver::new(100);
        let first = resolver.resolve("repo", "ns", "auth");
        let second = resolver.resolve("repo", "ns", "auth");
        assert_eq!(first.id, second.id);
        assert!(first.is_new);
        assert!(!second.is_new);
    }

    #[test]
    fn alias_resolves_to_canonical_entity() {
        let resolver = EntityResolver::new(100);
        resolver.register_alias("auth-svc", "auth-service");
        let canonical = resolver.resolve("repo", "ns", "auth-service");
        let aliased = resolver.resolve("repo", "ns", "auth-svc");
        assert_eq!(canonical.id, aliased.id);
    }

    #[test]
    fn lru_bound_evicts_oldest_known_entity() {
        let resolver = EntityResolver::new(2);
        let a = resolver.resolve("r", "n", "a");
        resolver.resolve("r", "n", "b");
        resolver.resolve("r", "n", "c");
        let a_again = resolver.resolve("r", "n", "a");
        assert_eq!(a.id, a_again.id);
        assert!(a_again.is_new, "a was evicted from the known set by b/c");
    }
}
