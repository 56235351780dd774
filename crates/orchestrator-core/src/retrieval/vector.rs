//! Vector retrieval path: full-text name search, ACL/tenant filtered,
//! capped by `max_results`. A fallback query builder constructs the
//! exact Cypher string run against the fulltext index; in production a
//! request with no resolvable tenant id fails closed rather than
//! silently searching across tenants.

use crate::error::{OrchestratorError, Result};
use crate::model::SecurityPrincipal;
use crate::retrieval::context::RetrievalContext;
use crate::traits::GraphRow;
use serde_json::Value;
use std::collections::BTreeMap;

const SERVICE_NAME_INDEX: &str = "service_name_index";

/// The fulltext index lookup. Frozen text; only `query`/`limit` vary.
#[must_use]
pub fn build_vector_cypher() -> &'static str {
    "CALL db.index.fulltext.queryNodes($index, $query) \
     YIELD node, score \
     RETURN node {.*, score: score} AS result \
     ORDER BY score DESC LIMIT $limit"
}

/// Post-fetch ACL/tenant filter, since a `CALL db.index.fulltext...`
/// procedure call has no `MATCH` scope for the AST-level ACL rewriter
/// to inject into. Every row not carrying the principal's tenant and
/// team/namespace grant is dropped before it ever reaches a caller.
#[must_use]
pub fn filter_rows_by_acl(rows: Vec<GraphRow>, principal: &SecurityPrincipal) -> Vec<GraphRow> {
    if principal.is_admin() {
        return rows;
    }
    rows.into_iter()
        .filter(|row| row_is_visible(row, principal))
        .collect()
}

fn row_is_visible(row: &GraphRow, principal: &SecurityPrincipal) -> bool {
    let result = row.get("result").and_then(Value::as_object);
    let Some(result) = result else { return false };

    if let Some(tenant_id) = &principal.tenant_id {
        match result.get("tenant_id").and_then(Value::as_str) {
            Some(row_tenant) if row_tenant == tenant_id => {}
            _ => return false,
        }
    }

    if principal.team != "*" {
        let team_owner = result.get("team_owner").and_then(Value::as_str);
        if team_owner != Some(principal.team.as_str()) {
            return false;
        }
    }

    if principal.namespace != "*" {
        let namespace_acl = result
            .get("namespace_acl")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).collect::<Vec<_>>())
            .unwrap_or_default();
        if !namespace_acl.contains(&principal.namespace.as_str()) {
            return false;
        }
    }

    true
}

/// Runs the vector path: fulltext name search over `query`, ACL
/// filtered, capped at `limit`. Fails closed when a non-admin principal
/// resolves to no tenant id at all.
pub async fn vector_retrieve(ctx: &RetrievalContext<'_>, query: &str, limit: usize) -> Result<Vec<GraphRow>> {
    let principal = ctx.principal;
    if !principal.is_admin() && principal.tenant_id.is_none() {
        return Err(OrchestratorError::CypherValidation(
            "no tenant id resolved for a non-admin principal".to_string(),
        ));
    }

    let mut params = BTreeMap::new();
    params.insert("index".to_string(), Value::String(SERVICE_NAME_INDEX.to_string()));
    params.insert("query".to_string(), Value::String(query.to_string()));
    params.insert("limit".to_string(), Value::from(limit as i64));

    let rows = ctx.graph.execute_read(build_vector_cypher(), params).await?;
    Ok(filter_rows_by_acl(rows, principal))
}
