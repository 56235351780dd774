//! Multi-hop retrieval path: template match first; on a miss, fetch
//! vector seed candidates and run a bounded agentic traversal that
//! picks bounded-Cypher variable-length expansion for low-degree starts
//! and batched BFS for high-degree ones. An APOC path-expander
//! procedure, where the graph-store adapter exposes one, is tried
//! before either fallback with its own timeout — that substitution is
//! the adapter's concern, not this store-agnostic pass.

use crate::config::CostEstimatorConfig;
use crate::cypher::{match_template, secure_query, template_cypher, TemplateId};
use crate::error::Result;
use crate::model::SecurityPrincipal;
use crate::retrieval::context::RetrievalContext;
use crate::traits::{GraphRow, GraphStore};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

use super::vector::vector_retrieve;

/// Maximum variable-length path depth for the agentic bounded-Cypher
/// fallback; kept well under the cost estimator's own path-depth cap.
const AGENTIC_MAX_DEPTH: u32 = 3;
/// Frontier expansions per batched-BFS round.
const BFS_MAX_DEPTH: u32 = 3;

#[derive(Debug, Clone, Default)]
pub struct MultiHopOutcome {
    pub used_template: Option<TemplateId>,
    pub candidates: Vec<GraphRow>,
    pub rows: Vec<GraphRow>,
}

fn row_str(row: &GraphRow, key: &str) -> Option<String> {
    row.get(key).and_then(Value::as_str).map(str::to_string)
}

fn row_degree(row: &GraphRow) -> Option<u64> {
    row.get("degree").and_then(Value::as_u64)
}

async fn run_templated(
    graph: &dyn GraphStore,
    id: TemplateId,
    template_params: &std::collections::HashMap<String, String>,
    max_results: i64,
    principal: &SecurityPrincipal,
    default_deny_untagged: bool,
    cost_config: &CostEstimatorConfig,
) -> Result<Vec<GraphRow>> {
    let secured = secure_query(
        template_cypher(id),
        principal,
        default_deny_untagged,
        "n",
        cost_config,
    )?;

    let mut params: BTreeMap<String, Value> = BTreeMap::new();
    for (k, v) in template_params {
        params.insert(k.clone(), Value::String(v.clone()));
    }
    params.insert("max_results".to_string(), Value::from(max_results));
    for (k, v) in &secured.acl_params {
        params.insert(k.clone(), Value::String(v.clone()));
    }

    graph.execute_read(&secured.cypher, params).await
}

async fn bounded_cypher_traverse(
    graph: &dyn GraphStore,
    entity: &str,
    max_results: i64,
    principal: &SecurityPrincipal,
    default_deny_untagged: bool,
    cost_config: &CostEstimatorConfig,
) -> Result<Vec<GraphRow>> {
    let cypher = format!(
        "MATCH (n {{name: $entity}})-[:CALLS*1..{AGENTIC_MAX_DEPTH}]->(m) RETURN DISTINCT m LIMIT $max_results"
    );
    let secured = secure_query(&cypher, principal, default_deny_untagged, "m", cost_config)?;

    let mut params: BTreeMap<String, Value> = BTreeMap::new();
    params.insert("entity".to_string(), Value::String(entity.to_string()));
    params.insert("max_results".to_string(), Value::from(max_results));
    for (k, v) in &secured.acl_params {
        params.insert(k.clone(), Value::String(v.clone()));
    }

    graph.execute_read(&secured.cypher, params).await
}

/// Batched BFS: one `MATCH (n)-[r]-(m) WHERE n.name IN $frontier`
/// round per depth, degree-capped the same way the single-hop path is,
/// stopping once the frontier is exhausted or `BFS_MAX_DEPTH` is hit.
/// Used for high-degree starts where a variable-length Cypher path
/// would expand combinatorially before the database ever applies the
/// degree predicate.
async fn batched_bfs_traverse(
    graph: &dyn GraphStore,
    seed_names: &[String],
    degree_cap: u32,
    principal: &SecurityPrincipal,
    default_deny_untagged: bool,
    cost_config: &CostEstimatorConfig,
) -> Result<Vec<GraphRow>> {
    let hop_cypher = "MATCH (n)-[r]-(m) WHERE n.name IN $names AND m.degree <= $degree_cap \
                       RETURN n.name AS source, type(r) AS rel, m.name AS target, m.degree AS degree";
    let secured = secure_query(hop_cypher, principal, default_deny_untagged, "m", cost_config)?;

    let mut frontier: Vec<String> = seed_names.to_vec();
    let mut visited: HashSet<String> = seed_names.iter().cloned().collect();
    let mut collected: Vec<GraphRow> = Vec::new();

    for _ in 0..BFS_MAX_DEPTH {
        if frontier.is_empty() {
            break;
        }

        let mut params: BTreeMap<String, Value> = BTreeMap::new();
        params.insert(
            "names".to_string(),
            Value::Array(frontier.iter().cloned().map(Value::String).collect()),
        );
        params.insert("degree_cap".to_string(), Value::from(degree_cap));
        for (k, v) in &secured.acl_params {
            params.insert(k.clone(), Value::String(v.clone()));
        }

        let rows = graph.execute_read(&secured.cypher, params).await?;
        let mut next_frontier = Vec::new();
        for row in &rows {
            if let Some(target) = row_str(row, "target") {
                if visited.insert(target.clone()) {
                    next_frontier.push(target);
                }
            }
        }
        collected.extend(rows);
        frontier = next_frontier;
    }

    Ok(collected)
}

/// Runs the multi-hop path. A template match short-circuits agentic
/// traversal entirely; otherwise seeds come from the vector path and
/// the degree hint carried on those candidate rows (never a dedicated
/// probe round-trip) picks the traversal strategy.
pub async fn multi_hop_retrieve(ctx: &RetrievalContext<'_>, query: &str, limit: usize) -> Result<MultiHopOutcome> {
    let principal = ctx.principal;
    let cost_config = ctx.cost_config;
    let default_deny_untagged = ctx.default_deny_untagged;

    if let Some((id, template_params)) = match_template(query) {
        let rows = run_templated(
            ctx.graph,
            id,
            &template_params,
            i64::from(cost_config.max_results_default),
            principal,
            default_deny_untagged,
            cost_config,
        )
        .await?;
        return Ok(MultiHopOutcome {
            used_template: Some(id),
            candidates: Vec::new(),
            rows,
        });
    }

    let candidates = vector_retrieve(ctx, query, limit).await?;
    let names: Vec<String> = candidates
        .iter()
        .filter_map(|c| row_str(c, "name").or_else(|| row_str(c, "result")))
        .collect();

    if names.is_empty() {
        return Ok(MultiHopOutcome { used_template: None, candidates, rows: Vec::new() });
    }

    let max_degree_hint = candidates.iter().filter_map(row_degree).max().unwrap_or(0);

    let rows = if max_degree_hint > u64::from(ctx.retrieval_config.high_degree_threshold) {
        batched_bfs_traverse(
            ctx.graph,
            &names,
            ctx.retrieval_config.degree_cap,
            principal,
            default_deny_untagged,
            cost_config,
        )
        .await?
    } else {
        bounded_cypher_traverse(
            ctx.graph,
            &names[0],
            i64::from(cost_config.max_results_default),
            principal,
            default_deny_untagged,
            cost_config,
        )
        .await?
    };

    Ok(MultiHopOutcome { used_template: None, candidates, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_cypher_path_text_respects_agentic_depth() {
        let cypher = format!("1..{AGENTIC_MAX_DEPTH}");
        assert!(cypher.contains("1..3"));
    }
}
