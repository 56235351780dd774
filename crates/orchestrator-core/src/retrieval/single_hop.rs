//! Single-hop retrieval path: vector seed, one degree-capped
//! MATCH-expand, then a personalized PageRank pass over the local edge
//! set to keep topologically important neighbors. For very large edge
//! sets a GDS-backed projection strategy is preferable (`gds.pageRank.
//! stream` over a named, always-dropped projection); that is the
//! concern of the graph-store adapter, not this store-agnostic pass —
//! here we only apply the safety cap and fall back to unweighted order.

use crate::cypher::secure_query;
use crate::error::Result;
use crate::retrieval::context::RetrievalContext;
use crate::traits::GraphRow;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::vector::vector_retrieve;

const PPR_DAMPING: f64 = 0.85;
const PPR_ITERATIONS: usize = 20;
/// Edge sets above this are skipped for PPR entirely; the hop result is
/// returned in its deterministic degree order instead.
const MAX_PPR_EDGES: usize = 5000;

/// `MATCH (n)-[r]-(m) WHERE n.name IN $names AND m.degree <= $degree_cap
/// RETURN ...`. The degree cap is a `WHERE` predicate, never an `ORDER
/// BY m.degree DESC LIMIT n` — the latter would force the database to
/// materialize and sort every neighbor, including supernodes, before
/// limiting. `ORDER BY m.degree DESC, m.name` only stabilizes output
/// order among the already-capped rows.
fn build_hop_cypher() -> &'static str {
    "MATCH (n)-[r]-(m) \
     WHERE n.name IN $names AND m.degree <= $degree_cap \
     RETURN n.name AS source, type(r) AS rel, m.name AS target, m.degree AS degree \
     ORDER BY m.degree DESC, m.name"
}

#[derive(Debug, Clone, Default)]
pub struct SingleHopOutcome {
    pub candidates: Vec<GraphRow>,
    pub hop_rows: Vec<GraphRow>,
}

fn row_str(row: &GraphRow, key: &str) -> Option<String> {
    row.get(key).and_then(Value::as_str).map(str::to_string)
}

fn personalized_pagerank(seeds: &[String], edges: &[(String, String)]) -> HashMap<String, f64> {
    if edges.is_empty() || edges.len() > MAX_PPR_EDGES || seeds.is_empty() {
        return HashMap::new();
    }

    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    for (source, target) in edges {
        adjacency.entry(source.clone()).or_default().push(target.clone());
        adjacency.entry(target.clone()).or_default().push(source.clone());
    }

    let nodes: HashSet<String> = adjacency.keys().cloned().collect();
    let seed_set: HashSet<&String> = seeds.iter().collect();
    let personalization = 1.0 / seeds.len() as f64;

    let mut scores: HashMap<String, f64> = nodes
        .iter()
        .map(|n| (n.clone(), if seed_set.contains(n) { personalization } else { 0.0 }))
        .collect();

    for _ in 0..PPR_ITERATIONS {
        let mut next = HashMap::with_capacity(nodes.len());
        for node in &nodes {
            let teleport = if seed_set.contains(node) {
                (1.0 - PPR_DAMPING) * personalization
            } else {
                0.0
            };
            let inflow: f64 = adjacency
                .get(node)
                .map(|neighbors| {
                    neighbors
                        .iter()
                        .map(|nbr| {
                            let degree = adjacency.get(nbr).map_or(1, Vec::len).max(1) as f64;
                            scores.get(nbr).copied().unwrap_or(0.0) / degree
                        })
                        .sum()
                })
                .unwrap_or(0.0);
            next.insert(node.clone(), teleport + PPR_DAMPING * inflow);
        }
        scores = next;
    }

    scores
}

/// Runs the single-hop path: vector seed, degree-capped expand, then
/// reorders the hop result by personalized PageRank over its own edge
/// set (skipped above [`MAX_PPR_EDGES`], in which case the deterministic
/// degree order from the query itself stands).
pub async fn single_hop_retrieve(ctx: &RetrievalContext<'_>, query: &str, limit: usize) -> Result<SingleHopOutcome> {
    let candidates = vector_retrieve(ctx, query, limit).await?;
    let names: Vec<String> = candidates
        .iter()
        .filter_map(|c| row_str(c, "name").or_else(|| row_str(c, "result")))
        .collect();

    if names.is_empty() {
        return Ok(SingleHopOutcome { candidates, hop_rows: Vec::new() });
    }

    let secured = secure_query(
        build_hop_cypher(),
        ctx.principal,
        ctx.default_deny_untagged,
        "m",
        ctx.cost_config,
    )?;

    let mut params: BTreeMap<String, Value> = BTreeMap::new();
    params.insert(
        "names".to_string(),
        Value::Array(names.iter().cloned().map(Value::String).collect()),
    );
    params.insert("degree_cap".to_string(), Value::from(ctx.retrieval_config.degree_cap));
    for (k, v) in &secured.acl_params {
        params.insert(k.clone(), Value::String(v.clone()));
    }

    let hop_rows = ctx.graph.execute_read(&secured.cypher, params).await?;

    let edges: Vec<(String, String)> = hop_rows
        .iter()
        .filter_map(|row| Some((row_str(row, "source")?, row_str(row, "target")?)))
        .collect();
    let ranks = personalized_pagerank(&names, &edges);

    let mut ranked = hop_rows;
    if !ranks.is_empty() {
        ranked.sort_by(|a, b| {
            let score_a = row_str(a, "target").and_then(|t| ranks.get(&t).copied()).unwrap_or(0.0);
            let score_b = row_str(b, "target").and_then(|t| ranks.get(&t).copied()).unwrap_or(0.0);
            score_b.total_cmp(&score_a)
        });
    }

    Ok(SingleHopOutcome { candidates, hop_rows: ranked })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ppr_favors_nodes_reachable_from_seeds() {
        let seeds = vec!["checkout".to_string()];
        let edges = vec![
            ("checkout".to_string(), "payment".to_string()),
            ("payment".to_string(), "fraud".to_string()),
            ("unrelated-a".to_string(), "unrelated-b".to_string()),
        ];
        let ranks = personalized_pagerank(&seeds, &edges);
        assert!(ranks["payment"] > ranks["unrelated-a"]);
    }

    #[test]
    fn ppr_is_skipped_above_the_edge_cap() {
        let seeds = vec!["a".to_string()];
        let edges: Vec<(String, String)> = (0..MAX_PPR_EDGES + 1)
            .map(|i| ("a".to_string(), format!("n{i}")))
            .collect();
        assert!(personalized_pagerank(&seeds, &edges).is_empty());
    }

    #[test]
    fn ppr_is_empty_with_no_edges() {
        assert!(personalized_pagerank(&["a".to_string()], &[]).is_empty());
    }
}
