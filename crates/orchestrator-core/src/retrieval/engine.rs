//! Retrieval engine: classifies a query, dispatches to one of the four
//! retrieval paths, and wraps the dispatch in the per-request semantic
//! cache lookup, the subgraph cache, and single-flight coalescing for
//! concurrent identical cache misses.

use crate::cache::{cache_key, SemanticCacheEntry, SemanticQueryCache, SubgraphCache};
use crate::classifier::classify_query;
use crate::config::{CostEstimatorConfig, RetrievalConfig};
use crate::cypher::acl::AclRewriter;
use crate::cypher::TemplateId;
use crate::error::Result;
use crate::graph_analytics::{compute_centroid, GraphTopology, Node2VecConfig, Node2VecEmbedder};
use crate::model::{QueryComplexity, SecurityPrincipal};
use crate::reranker::{density_rank, structural_rank};
use crate::retrieval::context::RetrievalContext;
use crate::traits::{EmbeddingClient, GraphRow, GraphStore};
use crate::worker_pool::WorkerPools;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

/// Below this many candidates, reranking overhead isn't worth a pool
/// round-trip; `density_rank` itself also falls back to plain BM25 order
/// under its own `min_candidates` threshold.
const RERANK_MIN_CANDIDATES: usize = 4;
const DENSITY_LAMBDA: f32 = 0.7;

use super::hybrid::hybrid_retrieve;
use super::multi_hop::multi_hop_retrieve;
use super::single_hop::single_hop_retrieve;
use super::vector::vector_retrieve;

#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    pub complexity: Option<QueryComplexity>,
    pub candidates: Vec<GraphRow>,
    pub rows: Vec<GraphRow>,
    pub used_template: Option<TemplateId>,
    pub from_cache: bool,
}

pub struct RetrievalEngine {
    graph: Arc<dyn GraphStore>,
    embeddings: Option<Arc<dyn EmbeddingClient>>,
    subgraph_cache: Arc<SubgraphCache>,
    semantic_cache: Arc<SemanticQueryCache>,
    retrieval_config: RetrievalConfig,
    cost_config: CostEstimatorConfig,
    default_deny_untagged: bool,
    inflight: DashMap<String, Arc<AsyncMutex<()>>>,
    worker_pools: Option<Arc<WorkerPools>>,
}

impl RetrievalEngine {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        embeddings: Option<Arc<dyn EmbeddingClient>>,
        subgraph_cache: Arc<SubgraphCache>,
        semantic_cache: Arc<SemanticQueryCache>,
        retrieval_config: RetrievalConfig,
        cost_config: CostEstimatorConfig,
        default_deny_untagged: bool,
    ) -> Self {
        Self {
            graph,
            embeddings,
            subgraph_cache,
            semantic_cache,
            retrieval_config,
            cost_config,
            default_deny_untagged,
            inflight: DashMap::new(),
            worker_pools: None,
        }
    }

    /// Attaches the shared CPU worker pool used to rerank dispatch
    /// results off the request-handling task. Without one, dispatch
    /// results are returned in the order the graph store produced them.
    #[must_use]
    pub fn with_worker_pools(mut self, worker_pools: Arc<WorkerPools>) -> Self {
        self.worker_pools = Some(worker_pools);
        self
    }

    fn acl_key(&self, principal: &SecurityPrincipal) -> String {
        let rewriter = AclRewriter::new(principal.clone(), self.default_deny_untagged);
        let (clause, _) = rewriter.node_filter("n");
        format!("{clause}::{}", principal.tenant_id.as_deref().unwrap_or("*"))
    }

    /// Per-key lock used only to coalesce concurrent subgraph-cache
    /// misses onto a single computation; never held across an error
    /// return, so a failed computation lets the next waiter retry
    /// rather than inherit the failure.
    fn lock_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        self.inflight.entry(key.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    pub async fn execute(
        &self,
        query: &str,
        principal: &SecurityPrincipal,
        limit: usize,
    ) -> Result<RetrievalOutcome> {
        let complexity = classify_query(query);
        let acl_key = self.acl_key(principal);

        if let Some(embeddings) = &self.embeddings {
            if let Ok(embedding) = embeddings.embed(query).await {
                let tenant_id = principal.tenant_id.as_deref().unwrap_or("*");
                if let Some(cached) = self.semantic_cache.get(&embedding, tenant_id, &acl_key) {
                    if let Ok(outcome) = serde_json::from_str::<RetrievalOutcome>(&cached) {
                        let mut outcome = outcome;
                        outcome.from_cache = true;
                        return Ok(outcome);
                    }
                }

                let row_key = self.subgraph_key(complexity, query, &acl_key);
                let outcome = self.dispatch_cached(complexity, query, principal, limit, &row_key).await?;

                if let Ok(serialized) = serde_json::to_string(&outcome) {
                    self.semantic_cache.put(SemanticCacheEntry {
                        query: query.to_string(),
                        embedding,
                        result: serialized,
                        tenant_id: tenant_id.to_string(),
                        acl_key: acl_key.clone(),
                    });
                }
                return Ok(outcome);
            }
        }

        let row_key = self.subgraph_key(complexity, query, &acl_key);
        self.dispatch_cached(complexity, query, principal, limit, &row_key).await
    }

    fn subgraph_key(&self, complexity: QueryComplexity, query: &str, acl_key: &str) -> String {
        let mut acl_params = BTreeMap::new();
        acl_params.insert("acl_key".to_string(), acl_key.to_string());
        cache_key(&format!("{}::{query}", complexity.as_str()), &acl_params)
    }

    async fn dispatch_cached(
        &self,
        complexity: QueryComplexity,
        query: &str,
        principal: &SecurityPrincipal,
        limit: usize,
        row_key: &str,
    ) -> Result<RetrievalOutcome> {
        if let Some(rows) = self.subgraph_cache.get(row_key) {
            return Ok(RetrievalOutcome {
                complexity: Some(complexity),
                candidates: Vec::new(),
                rows,
                used_template: None,
                from_cache: true,
            });
        }

        let lock = self.lock_for(row_key);
        let _guard = lock.lock().await;

        if let Some(rows) = self.subgraph_cache.get(row_key) {
            return Ok(RetrievalOutcome {
                complexity: Some(complexity),
                candidates: Vec::new(),
                rows,
                used_template: None,
                from_cache: true,
            });
        }

        let mut outcome = self.dispatch(complexity, query, principal, limit).await?;
        let rows = outcome.rows.clone();
        outcome.candidates = self.rerank(query, complexity, outcome.candidates, &rows).await;
        self.subgraph_cache.put(row_key, outcome.rows.clone(), &[]);
        Ok(outcome)
    }

    /// Reorders dispatch candidates by density rank (BM25+MMR) fused with
    /// structural similarity (cosine over Node2Vec embeddings of the local
    /// edge set, weighted by query complexity), run on the shared worker
    /// pool so this never blocks the request-handling task. A no-op
    /// without a configured pool or below the minimum candidate count
    /// `density_rank` itself needs to do anything useful. Falls back to
    /// density rank alone when the dispatch produced no edges to embed
    /// (entity lookup and aggregate paths return no `source`/`target` rows).
    async fn rerank(&self, query: &str, complexity: QueryComplexity, candidates: Vec<GraphRow>, rows: &[GraphRow]) -> Vec<GraphRow> {
        let Some(pools) = &self.worker_pools else { return candidates };
        if candidates.len() < RERANK_MIN_CANDIDATES {
            return candidates;
        }

        // The pair's "id" is just the candidate's position — rows have no
        // stable external id at this layer — so it round-trips through
        // `density_rank`/`structural_rank` purely to recover the
        // permutation they chose.
        let pairs: Vec<(String, String)> = candidates.iter().enumerate().map(|(idx, row)| (idx.to_string(), row_text(row))).collect();
        let node_keys: HashMap<String, String> = candidates
            .iter()
            .enumerate()
            .filter_map(|(idx, row)| row_str(row, "name").or_else(|| row_str(row, "result")).map(|k| (idx.to_string(), k)))
            .collect();
        let mut by_index: BTreeMap<String, GraphRow> = candidates.into_iter().enumerate().map(|(idx, row)| (idx.to_string(), row)).collect();

        let edges: Vec<(String, String)> = rows.iter().filter_map(|row| Some((row_str(row, "source")?, row_str(row, "target")?))).collect();

        let query = query.to_string();
        let ranked = pools
            .run_rerank(move || {
                let density = density_rank(&query, &pairs, DENSITY_LAMBDA, RERANK_MIN_CANDIDATES);
                rank_with_structure(density, &node_keys, &edges, complexity)
            })
            .await;

        ranked.into_iter().filter_map(|ranked_candidate| by_index.remove(&ranked_candidate.id)).collect()
    }

    async fn dispatch(
        &self,
        complexity: QueryComplexity,
        query: &str,
        principal: &SecurityPrincipal,
        limit: usize,
    ) -> Result<RetrievalOutcome> {
        path_for(complexity).retrieve(self, query, principal, limit).await
    }
}

/// One of the four retrieval strategies the classifier can select. Kept
/// as a trait object rather than an inline match on `QueryComplexity` so
/// a new path only needs a new impl, never a change to `dispatch` itself.
#[async_trait::async_trait]
trait RetrievalPath: Send + Sync {
    async fn retrieve(
        &self,
        engine: &RetrievalEngine,
        query: &str,
        principal: &SecurityPrincipal,
        limit: usize,
    ) -> Result<RetrievalOutcome>;
}

/// Builds the per-dispatch [`RetrievalContext`] a path threads through
/// its own helper calls, rather than each path re-deriving it from the
/// engine's fields individually.
fn context_for<'a>(engine: &'a RetrievalEngine, principal: &'a SecurityPrincipal) -> RetrievalContext<'a> {
    RetrievalContext {
        graph: engine.graph.as_ref(),
        principal,
        retrieval_config: &engine.retrieval_config,
        cost_config: &engine.cost_config,
        default_deny_untagged: engine.default_deny_untagged,
    }
}

struct EntityLookupPath;

#[async_trait::async_trait]
impl RetrievalPath for EntityLookupPath {
    async fn retrieve(
        &self,
        engine: &RetrievalEngine,
        query: &str,
        principal: &SecurityPrincipal,
        limit: usize,
    ) -> Result<RetrievalOutcome> {
        let ctx = context_for(engine, principal);
        let candidates = vector_retrieve(&ctx, query, limit).await?;
        Ok(RetrievalOutcome {
            complexity: Some(QueryComplexity::EntityLookup),
            candidates,
            rows: Vec::new(),
            used_template: None,
            from_cache: false,
        })
    }
}

struct SingleHopPath;

#[async_trait::async_trait]
impl RetrievalPath for SingleHopPath {
    async fn retrieve(
        &self,
        engine: &RetrievalEngine,
        query: &str,
        principal: &SecurityPrincipal,
        limit: usize,
    ) -> Result<RetrievalOutcome> {
        let ctx = context_for(engine, principal);
        let outcome = single_hop_retrieve(&ctx, query, limit).await?;
        Ok(RetrievalOutcome {
            complexity: Some(QueryComplexity::SingleHop),
            candidates: outcome.candidates,
            rows: outcome.hop_rows,
            used_template: None,
            from_cache: false,
        })
    }
}

struct MultiHopPath;

#[async_trait::async_trait]
impl RetrievalPath for MultiHopPath {
    async fn retrieve(
        &self,
        engine: &RetrievalEngine,
        query: &str,
        principal: &SecurityPrincipal,
        limit: usize,
    ) -> Result<RetrievalOutcome> {
        let ctx = context_for(engine, principal);
        let outcome = multi_hop_retrieve(&ctx, query, limit).await?;
        Ok(RetrievalOutcome {
            complexity: Some(QueryComplexity::MultiHop),
            candidates: outcome.candidates,
            rows: outcome.rows,
            used_template: outcome.used_template,
            from_cache: false,
        })
    }
}

struct AggregatePath;

#[async_trait::async_trait]
impl RetrievalPath for AggregatePath {
    async fn retrieve(
        &self,
        engine: &RetrievalEngine,
        query: &str,
        principal: &SecurityPrincipal,
        limit: usize,
    ) -> Result<RetrievalOutcome> {
        let ctx = context_for(engine, principal);
        let outcome = hybrid_retrieve(&ctx, query, limit).await?;
        Ok(RetrievalOutcome {
            complexity: Some(QueryComplexity::Aggregate),
            candidates: outcome.candidates,
            rows: outcome.aggregate_rows,
            used_template: outcome.aggregate_template,
            from_cache: false,
        })
    }
}

fn path_for(complexity: QueryComplexity) -> Box<dyn RetrievalPath> {
    match complexity {
        QueryComplexity::EntityLookup => Box::new(EntityLookupPath),
        QueryComplexity::SingleHop => Box::new(SingleHopPath),
        QueryComplexity::MultiHop => Box::new(MultiHopPath),
        QueryComplexity::Aggregate => Box::new(AggregatePath),
    }
}

/// Flattens a row's `result` object (or the whole row, for rows with no
/// such key) into a string for BM25 scoring. There's no canonical "body
/// text" column at this layer, so the row's own JSON stands in for it.
fn row_text(row: &GraphRow) -> String {
    row.get("result").map(ToString::to_string).unwrap_or_else(|| serde_json::to_string(row).unwrap_or_default())
}

fn row_str(row: &GraphRow, key: &str) -> Option<String> {
    row.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Fuses density-ranked candidates with structural similarity: builds a
/// local topology from the dispatch's own edge rows, embeds it with
/// Node2Vec, and takes the centroid of the edges' source nodes (the
/// query's seed entities) as the structural query vector compared against
/// each candidate's embedding. Candidates with no resolvable node key or
/// embedding keep their density-rank position, appended after the fused
/// ones. Falls back to the density order untouched when there's no edge
/// set to embed (entity lookup and aggregate dispatch produce none).
fn rank_with_structure(
    density: Vec<crate::reranker::RankedCandidate>,
    node_keys: &HashMap<String, String>,
    edges: &[(String, String)],
    complexity: QueryComplexity,
) -> Vec<crate::reranker::RankedCandidate> {
    if edges.is_empty() {
        return density;
    }

    let topology = GraphTopology::from_edges(edges);
    if topology.is_empty() {
        return density;
    }

    let embeddings = Node2VecEmbedder::new(Node2VecConfig::default()).embed(&topology);
    let seed_names: HashSet<&String> = edges.iter().map(|(source, _)| source).collect();
    let seed_vectors: Vec<Vec<f32>> = seed_names.into_iter().filter_map(|name| embeddings.get(name).cloned()).collect();
    if seed_vectors.is_empty() {
        return density;
    }
    let query_vector = compute_centroid(&seed_vectors);

    let text_scores: HashMap<String, f32> = density.iter().map(|c| (c.id.clone(), c.score)).collect();
    let structural_candidates: Vec<(String, String, Vec<f32>)> = density
        .iter()
        .filter_map(|c| {
            let key = node_keys.get(&c.id)?;
            let embedding = embeddings.get(key)?;
            Some((c.id.clone(), c.text.clone(), embedding.clone()))
        })
        .collect();
    if structural_candidates.is_empty() {
        return density;
    }

    let fused = structural_rank(&query_vector, &structural_candidates, &text_scores, complexity);
    let fused_ids: HashSet<String> = fused.iter().map(|c| c.id.clone()).collect();
    let mut result = fused;
    result.extend(density.into_iter().filter(|c| !fused_ids.contains(&c.id)));
    result
}

impl serde::Serialize for RetrievalOutcome {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("RetrievalOutcome", 4)?;
        s.serialize_field("candidates", &self.candidates)?;
        s.serialize_field("rows", &self.rows)?;
        s.serialize_field("used_template", &self.used_template.map(|t| t.as_str()))?;
        s.serialize_field("from_cache", &self.from_cache)?;
        s.end()
    }
}

impl<'de> serde::Deserialize<'de> for RetrievalOutcome {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(serde::Deserialize)]
        struct Raw {
            candidates: Vec<GraphRow>,
            rows: Vec<GraphRow>,
            used_template: Option<String>,
            from_cache: bool,
        }
        let raw = Raw::deserialize(deserializer)?;
        let used_template = raw.used_template.and_then(|s| {
            [
                TemplateId::BlastRadius,
                TemplateId::DependencyCount,
                TemplateId::ServiceNeighbors,
                TemplateId::TopicConsumers,
                TemplateId::TopicProducers,
                TemplateId::ServiceDeployments,
                TemplateId::CrossTeamDependencies,
            ]
            .into_iter()
            .find(|t| t.as_str() == s)
        });
        Ok(Self {
            complexity: None,
            candidates: raw.candidates,
            rows: raw.rows,
            used_template,
            from_cache: false,
        })
    }
}
