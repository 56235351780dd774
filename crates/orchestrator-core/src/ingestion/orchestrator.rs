//! Ingestion orchestrator: `decode → extract → resolve → enrich →
//! commit → tombstone sweep → enqueue vector-sync → invalidate caches`.
//!
//! Commit batches entities into tenant-scoped `UNWIND ... MERGE`
//! statements; every MERGE and edge MATCH carries `tenant_id` in the
//! match pattern itself so a cross-tenant MERGE can never collide on a
//! shared primary key.

use crate::cache::SubgraphCache;
use crate::config::IngestionConfig;
use crate::entity_resolver::EntityResolver;
use crate::error::{OrchestratorError, Result};
use crate::ingestion::outbox::CoalescingOutbox;
use crate::model::{
    GraphEdge, GraphNode, VectorRecord, VectorSyncEvent, VectorSyncOperation, VectorSyncStatus,
};
use crate::traits::GraphStore;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One decoded extraction unit before entity resolution: a raw file
/// path (used to derive ACL defaults) plus the node/edge facts pulled
/// from it.
#[derive(Debug, Clone)]
pub struct ExtractedRecord {
    pub source_path: String,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Derives `team_owner` from a `services/<team>/...` path convention
/// and defaults `read_roles` to `["reader"]` when the extractor didn't
/// already set them.
fn enrich_acl_defaults(node: &mut GraphNode, source_path: &str) {
    if node.team_owner.is_empty() {
        if let Some(team) = source_path
            .strip_prefix("services/")
            .and_then(|rest| rest.split('/').next())
        {
            node.team_owner = team.to_string();
        }
    }
    if node.read_roles.is_empty() {
        node.read_roles = vec!["reader".to_string()];
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IngestionReport {
    pub ingestion_id: String,
    pub nodes_committed: usize,
    pub edges_committed: usize,
    pub tombstoned: u64,
    pub vector_sync_enqueued: usize,
}

pub struct IngestionOrchestrator {
    graph: Arc<dyn GraphStore>,
    resolver: Arc<EntityResolver>,
    subgraph_cache: Arc<SubgraphCache>,
    outbox: Arc<CoalescingOutbox>,
    config: IngestionConfig,
}

impl IngestionOrchestrator {
    #[must_use]
    pub fn new(
        graph: Arc<dyn GraphStore>,
        resolver: Arc<EntityResolver>,
        subgraph_cache: Arc<SubgraphCache>,
        outbox: Arc<CoalescingOutbox>,
        config: IngestionConfig,
    ) -> Self {
        Self { graph, resolver, subgraph_cache, outbox, config }
    }

    /// Runs the full ingestion DAG for one batch of already-decoded
    /// extraction records, scoped to a single `tenant_id`.
    pub async fn ingest_batch(&self, tenant_id: &str, mut records: Vec<ExtractedRecord>) -> Result<IngestionReport> {
        if tenant_id.is_empty() {
            return Err(OrchestratorError::InvalidIngestionRequest(
                "ingestion batch requires a non-empty tenant_id".to_string(),
            ));
        }

        let ingestion_id = uuid::Uuid::new_v4().to_string();

        for record in &mut records {
            for node in &mut record.nodes {
                node.tenant_id = tenant_id.to_string();
                enrich_acl_defaults(node, &record.source_path);
                let resolved = self.resolver.resolve("", "", &node.primary_key);
                node.primary_key = resolved.id.0;
            }
            for edge in &mut record.edges {
                edge.tenant_id = tenant_id.to_string();
                edge.ingestion_id.clone_from(&ingestion_id);
            }
        }

        let all_nodes: Vec<GraphNode> = records.iter().flat_map(|r| r.nodes.clone()).collect();
        let all_edges: Vec<GraphEdge> = records.iter().flat_map(|r| r.edges.clone()).collect();

        let nodes_committed = self.commit_nodes(&all_nodes).await?;
        let edges_committed = self.commit_edges(&all_edges).await?;
        let tombstoned = self.tombstone_sweep(tenant_id, &ingestion_id).await?;

        let vector_sync_enqueued = self.enqueue_vector_sync(&all_nodes);
        self.invalidate_caches(tenant_id, &all_nodes)?;

        Ok(IngestionReport {
            ingestion_id,
            nodes_committed,
            edges_committed,
            tombstoned,
            vector_sync_enqueued,
        })
    }

    async fn commit_nodes(&self, nodes: &[GraphNode]) -> Result<usize> {
        let mut committed = 0;
        for chunk in nodes.chunks(self.config.sink_batch_size) {
            let rows: Vec<Value> = chunk.iter().map(node_to_unwind_row).collect();
            let cypher = "UNWIND $rows AS row \
                          MERGE (n {primary_key: row.primary_key, tenant_id: row.tenant_id}) \
                          SET n += row.properties, n.team_owner = row.team_owner, \
                              n.namespace_acl = row.namespace_acl, n.read_roles = row.read_roles";
            let mut params = BTreeMap::new();
            params.insert("rows".to_string(), Value::Array(rows));
            self.graph.execute_write(cypher, params).await?;
            committed += chunk.len();
        }
        Ok(committed)
    }

    async fn commit_edges(&self, edges: &[GraphEdge]) -> Result<usize> {
        let mut committed = 0;
        for chunk in edges.chunks(self.config.sink_batch_size) {
            let rows: Vec<Value> = chunk.iter().map(edge_to_unwind_row).collect();
            let cypher = "UNWIND $rows AS row \
                          MATCH (a {primary_key: row.source, tenant_id: row.tenant_id}) \
                          MATCH (b {primary_key: row.target, tenant_id: row.tenant_id}) \
                          MERGE (a)-[r:REL {kind: row.kind, tenant_id: row.tenant_id}]->(b) \
                          SET r.ingestion_id = row.ingestion_id, r.last_seen_at = row.last_seen_at, \
                              r.tombstoned_at = null";
            let mut params = BTreeMap::new();
            params.insert("rows".to_string(), Value::Array(rows));
            self.graph.execute_write(cypher, params).await?;
            committed += chunk.len();
        }
        Ok(committed)
    }

    /// Marks every relationship in `tenant_id`'s scope whose
    /// `ingestion_id` doesn't match the current batch as tombstoned.
    async fn tombstone_sweep(&self, tenant_id: &str, ingestion_id: &str) -> Result<u64> {
        let cypher = "MATCH (a {tenant_id: $tenant_id})-[r:REL {tenant_id: $tenant_id}]->(b {tenant_id: $tenant_id}) \
                      WHERE r.ingestion_id <> $ingestion_id AND r.tombstoned_at IS NULL \
                      SET r.tombstoned_at = datetime() \
                      RETURN count(r) AS tombstoned";
        let mut params = BTreeMap::new();
        params.insert("tenant_id".to_string(), Value::String(tenant_id.to_string()));
        params.insert("ingestion_id".to_string(), Value::String(ingestion_id.to_string()));
        let rows = self.graph.execute_write(cypher, params).await?;
        Ok(rows
            .first()
            .and_then(|r| r.get("tombstoned"))
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }

    fn enqueue_vector_sync(&self, nodes: &[GraphNode]) -> usize {
        let mut count = 0;
        for node in nodes {
            let event = VectorSyncEvent {
                event_id: uuid::Uuid::new_v4(),
                collection: node.kind.label().to_lowercase(),
                operation: VectorSyncOperation::Upsert,
                pruned_ids: vec![],
                vectors: vec![VectorRecord {
                    id: node.primary_key.clone(),
                    vector: vec![],
                    metadata: node.properties.clone(),
                }],
                status: VectorSyncStatus::Pending,
                retry_count: 0,
            };
            self.outbox.enqueue(event);
            count += 1;
        }
        count
    }

    /// Invalidates every cache entry touched by this batch's node ids.
    /// Rejects the call outright if `tenant_id` is empty, since an
    /// empty scope would otherwise evict every tenant's cache entries.
    fn invalidate_caches(&self, tenant_id: &str, nodes: &[GraphNode]) -> Result<()> {
        if tenant_id.is_empty() {
            return Err(OrchestratorError::InvalidIngestionRequest(
                "cache invalidation requires a non-empty tenant_id".to_string(),
            ));
        }
        let ids: Vec<String> = nodes.iter().map(|n| n.primary_key.clone()).collect();
        self.subgraph_cache.invalidate_by_nodes(&ids);
        Ok(())
    }
}

fn node_to_unwind_row(node: &GraphNode) -> Value {
    let mut row = serde_json::Map::new();
    row.insert("primary_key".to_string(), Value::String(node.primary_key.clone()));
    row.insert("tenant_id".to_string(), Value::String(node.tenant_id.clone()));
    row.insert("team_owner".to_string(), Value::String(node.team_owner.clone()));
    row.insert(
        "namespace_acl".to_string(),
        Value::Array(node.namespace_acl.iter().cloned().map(Value::String).collect()),
    );
    row.insert(
        "read_roles".to_string(),
        Value::Array(node.read_roles.iter().cloned().map(Value::String).collect()),
    );
    row.insert("properties".to_string(), Value::Object(node.properties.clone().into_iter().collect()));
    Value::Object(row)
}

fn edge_to_unwind_row(edge: &GraphEdge) -> Value {
    let mut row = serde_json::Map::new();
    row.insert("source".to_string(), Value::String(edge.source.clone()));
    row.insert("target".to_string(), Value::String(edge.target.clone()));
    row.insert("tenant_id".to_string(), Value::String(edge.tenant_id.clone()));
    row.insert("kind".to_string(), Value::String(edge.kind.label().to_string()));
    row.insert("ingestion_id".to_string(), Value::String(edge.ingestion_id.clone()));
    row.insert("last_seen_at".to_string(), Value::String(edge.last_seen_at.to_rfc3339()));
    Value::Object(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct RecordingGraph {
        writes: AtomicUsize,
    }

    #[async_trait]
    impl GraphStore for RecordingGraph {
        async fn execute_read(&self, _cypher: &str, _params: BTreeMap<String, Value>) -> Result<Vec<crate::traits::GraphRow>> {
            Ok(vec![])
        }
        async fn execute_write(&self, _cypher: &str, _params: BTreeMap<String, Value>) -> Result<Vec<crate::traits::GraphRow>> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            let mut row = BTreeMap::new();
            row.insert("tombstoned".to_string(), Value::from(0));
            Ok(vec![row])
        }
    }

    fn orchestrator() -> IngestionOrchestrator {
        IngestionOrchestrator::new(
            Arc::new(RecordingGraph { writes: AtomicUsize::new(0) }),
            Arc::new(EntityResolver::new(1000)),
            Arc::new(SubgraphCache::new(100)),
            Arc::new(CoalescingOutbox::new(Duration::from_secs(60))),
            IngestionConfig { sink_batch_size: 500, sync_timeout: Duration::from_secs(120) },
        )
    }

    fn sample_node(primary_key: &str) -> GraphNode {
        GraphNode {
            kind: NodeKind::Service,
            primary_key: primary_key.to_string(),
            tenant_id: String::new(),
            team_owner: String::new(),
            namespace_acl: vec![],
            read_roles: vec![],
            properties: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn empty_tenant_id_is_rejected() {
        let orchestrator = orchestrator();
        let result = orchestrator.ingest_batch("", vec![]).await;
        assert!(matches!(result, Err(OrchestratorError::InvalidIngestionRequest(_))));
    }

    #[tokio::test]
    async fn team_owner_is_derived_from_services_path_convention() {
        let orchestrator = orchestrator();
        let record = ExtractedRecord {
            source_path: "services/payments/checkout.py".to_string(),
            nodes: vec![sample_node("checkout-service")],
            edges: vec![],
        };
        let report = orchestrator.ingest_batch("tenant-a", vec![record]).await.unwrap();
        assert_eq!(report.nodes_committed, 1);
        assert_eq!(report.vector_sync_enqueued, 1);
    }

    #[tokio::test]
    async fn missing_read_roles_default_to_reader() {
        let mut node = sample_node("auth-service");
        enrich_acl_defaults(&mut node, "services/platform/auth.py");
        assert_eq!(node.read_roles, vec!["reader".to_string()]);
        assert_eq!(node.team_owner, "platform");
    }
}
