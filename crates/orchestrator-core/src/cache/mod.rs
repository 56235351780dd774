//! Subgraph result caching (LRU + two-tier) and the semantic query
//! cache.

pub mod semantic;
pub mod subgraph;

pub use semantic::{SemanticCacheEntry, SemanticQueryCache};
pub use subgraph::{cache_key, CacheStats, RedisSubgraphCache, SubgraphCache};
