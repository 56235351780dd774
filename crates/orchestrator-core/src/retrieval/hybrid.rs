//! Hybrid retrieval path: a vector prefilter for seed candidates plus
//! one aggregate template execution, fused into a single ranked
//! candidate list by reciprocal rank fusion rather than returned as two
//! independently-ordered sources.

use crate::cypher::{match_template, secure_query, template_cypher, TemplateId};
use crate::error::Result;
use crate::reranker::reciprocal_rank_fusion;
use crate::retrieval::context::RetrievalContext;
use crate::traits::GraphRow;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use super::vector::vector_retrieve;

/// Canonical aggregate template used when the free-text query doesn't
/// itself match one of the catalog's count-shaped templates.
const DEFAULT_AGGREGATE_TEMPLATE: TemplateId = TemplateId::DependencyCount;

#[derive(Debug, Clone, Default)]
pub struct HybridOutcome {
    pub candidates: Vec<GraphRow>,
    pub aggregate_rows: Vec<GraphRow>,
    pub aggregate_template: Option<TemplateId>,
}

fn row_str(row: &GraphRow, key: &str) -> Option<String> {
    row.get(key).and_then(Value::as_str).map(str::to_string)
}

pub async fn hybrid_retrieve(ctx: &RetrievalContext<'_>, query: &str, limit: usize) -> Result<HybridOutcome> {
    let principal = ctx.principal;
    let default_deny_untagged = ctx.default_deny_untagged;
    let cost_config = ctx.cost_config;

    let candidates = vector_retrieve(ctx, query, limit).await?;

    let (template_id, mut template_params) = match_template(query)
        .unwrap_or_else(|| (DEFAULT_AGGREGATE_TEMPLATE, std::collections::HashMap::new()));

    if !template_params.contains_key("entity") {
        let entity = candidates
            .first()
            .and_then(|c| row_str(c, "name").or_else(|| row_str(c, "result")))
            .unwrap_or_default();
        template_params.insert("entity".to_string(), entity);
    }

    let secured = secure_query(
        template_cypher(template_id),
        principal,
        default_deny_untagged,
        "n",
        cost_config,
    )?;

    let mut params: BTreeMap<String, Value> = BTreeMap::new();
    for (k, v) in &template_params {
        params.insert(k.clone(), Value::String(v.clone()));
    }
    params.insert(
        "max_results".to_string(),
        Value::from(i64::from(cost_config.max_results_default)),
    );
    for (k, v) in &secured.acl_params {
        params.insert(k.clone(), Value::String(v.clone()));
    }

    let aggregate_rows = ctx.graph.execute_read(&secured.cypher, params).await?;

    let candidate_ids: Vec<String> = candidates
        .iter()
        .enumerate()
        .map(|(i, row)| row_str(row, "name").or_else(|| row_str(row, "result")).unwrap_or_else(|| format!("cand-{i}")))
        .collect();
    let aggregate_ids: Vec<String> = aggregate_rows
        .iter()
        .enumerate()
        .map(|(i, row)| row_str(row, "name").or_else(|| row_str(row, "entity")).unwrap_or_else(|| format!("agg-{i}")))
        .collect();

    // Two independently-ranked sources over potentially overlapping
    // entities (the vector seed and the aggregate template's own
    // ordering) — exactly the multi-source-merge case RRF is for.
    let fused = reciprocal_rank_fusion(&[candidate_ids.clone(), aggregate_ids]);
    let rank_of: HashMap<String, usize> = fused.iter().enumerate().map(|(rank, (id, _))| (id.clone(), rank)).collect();

    let mut indexed: Vec<(String, GraphRow)> = candidate_ids.into_iter().zip(candidates).collect();
    indexed.sort_by_key(|(id, _)| rank_of.get(id).copied().unwrap_or(usize::MAX));
    let candidates: Vec<GraphRow> = indexed.into_iter().map(|(_, row)| row).collect();

    Ok(HybridOutcome {
        candidates,
        aggregate_rows,
        aggregate_template: Some(template_id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_aggregate_template_is_dependency_count() {
        assert_eq!(DEFAULT_AGGREGATE_TEMPLATE, TemplateId::DependencyCount);
    }
}
