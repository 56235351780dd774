//! Neo4j adapter for [`orchestrator_core::traits::GraphStore`].
//!
//! Connects through `neo4rs`, following the same `Graph::new(uri, user,
//! password)` pattern used elsewhere in this codebase. Reads are routed
//! across configured read replicas via
//! [`orchestrator_core::tenancy::ReplicaAwarePool`]; writes always go to
//! the primary.

use async_trait::async_trait;
use neo4rs::{BoltType, Graph, Query};
use orchestrator_core::error::{OrchestratorError, Result};
use orchestrator_core::tenancy::ReplicaAwarePool;
use orchestrator_core::traits::{GraphRow, GraphStore};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Connection config for a single Neo4j deployment: one primary plus
/// zero or more read replicas.
#[derive(Debug, Clone)]
pub struct Neo4jConfig {
    pub primary_uri: String,
    pub replica_uris: Vec<String>,
    pub user: String,
    pub password: String,
    pub database: String,
}

pub struct Neo4jGraphStore {
    pool: ReplicaAwarePool<Arc<Graph>>,
    database: String,
}

impl Neo4jGraphStore {
    /// Connects to the primary and every configured replica. Fails if
    /// any of them can't be reached — a store that silently drops a
    /// replica at startup would surprise callers relying on round-robin
    /// read fan-out.
    pub async fn connect(config: Neo4jConfig) -> Result<Self> {
        let primary = Self::connect_one(&config.primary_uri, &config.user, &config.password).await?;
        let mut replicas = Vec::with_capacity(config.replica_uris.len());
        for uri in &config.replica_uris {
            replicas.push(Self::connect_one(uri, &config.user, &config.password).await?);
        }
        Ok(Self {
            pool: ReplicaAwarePool::new(primary, replicas),
            database: config.database,
        })
    }

    async fn connect_one(uri: &str, user: &str, password: &str) -> Result<Arc<Graph>> {
        let graph = Graph::new(uri, user, password)
            .await
            .map_err(|e| OrchestratorError::GraphStore(format!("failed to connect to {uri}: {e}")))?;
        Ok(Arc::new(graph))
    }

    async fn run_query(graph: &Graph, cypher: &str, params: &BTreeMap<String, JsonValue>) -> Result<Vec<GraphRow>> {
        let query = bind_params(Query::new(cypher.to_string()), params);
        let mut stream = graph
            .execute(query)
            .await
            .map_err(|e| OrchestratorError::GraphStore(format!("query execution failed: {e}")))?;

        let mut rows = Vec::new();
        while let Some(row) = stream
            .next()
            .await
            .map_err(|e| OrchestratorError::GraphStore(format!("failed to read result row: {e}")))?
        {
            let parsed: GraphRow = row
                .to::<BTreeMap<String, JsonValue>>()
                .map_err(|e| OrchestratorError::GraphStore(format!("failed to decode result row: {e}")))?;
            rows.push(parsed);
        }
        Ok(rows)
    }
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn execute_read(&self, cypher: &str, params: BTreeMap<String, JsonValue>) -> Result<Vec<GraphRow>> {
        let graph = self.pool.read_handle();
        tracing::debug!(database = %self.database, "executing read query");
        Self::run_query(&graph, cypher, &params).await
    }

    async fn execute_write(&self, cypher: &str, params: BTreeMap<String, JsonValue>) -> Result<Vec<GraphRow>> {
        let graph = self.pool.write_handle();
        tracing::debug!(database = %self.database, "executing write query");
        Self::run_query(&graph, cypher, &params).await
    }
}

/// Binds a JSON-shaped param map onto a `neo4rs::Query`. Null values
/// bind as an absent optional rather than a Bolt null, since most
/// Cypher call sites never need to distinguish "parameter omitted"
/// from "parameter is null".
fn bind_params(mut query: Query, params: &BTreeMap<String, JsonValue>) -> Query {
    for (key, value) in params {
        query = query.param(key, json_to_bolt(value));
    }
    query
}

fn json_to_bolt(value: &JsonValue) -> BoltType {
    match value {
        JsonValue::Null => BoltType::Null(neo4rs::BoltNull),
        JsonValue::Bool(b) => BoltType::Boolean(neo4rs::BoltBoolean::new(*b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                BoltType::Integer(neo4rs::BoltInteger::new(i))
            } else {
                BoltType::Float(neo4rs::BoltFloat::new(n.as_f64().unwrap_or_default()))
            }
        }
        JsonValue::String(s) => BoltType::String(neo4rs::BoltString::new(s)),
        JsonValue::Array(items) => {
            let list: Vec<BoltType> = items.iter().map(json_to_bolt).collect();
            BoltType::List(neo4rs::BoltList::from(list))
        }
        JsonValue::Object(map) => {
            let mut bolt_map = neo4rs::BoltMap::new();
            for (k, v) in map {
                bolt_map.put(neo4rs::BoltString::new(k), json_to_bolt(v));
            }
            BoltType::Map(bolt_map)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_to_bolt_converts_scalars() {
        assert!(matches!(json_to_bolt(&JsonValue::Bool(true)), BoltType::Boolean(_)));
        assert!(matches!(json_to_bolt(&JsonValue::from(42)), BoltType::Integer(_)));
        assert!(matches!(json_to_bolt(&JsonValue::from(4.5)), BoltType::Float(_)));
        assert!(matches!(json_to_bolt(&JsonValue::from("hi")), BoltType::String(_)));
        assert!(matches!(json_to_bolt(&JsonValue::Null), BoltType::Null(_)));
    }

    #[test]
    fn json_to_bolt_converts_array() {
        let arr = serde_json::json!(["a", "b", "c"]);
        assert!(matches!(json_to_bolt(&arr), BoltType::List(_)));
    }

    #[test]
    fn json_to_bolt_converts_object() {
        let obj = serde_json::json!({"k": "v"});
        assert!(matches!(json_to_bolt(&obj), BoltType::Map(_)));
    }
}
