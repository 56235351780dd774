//! Shared data model types used across the cypher pipeline, the graph
//! entities, and the job/outbox subsystems.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A security principal resolved from an `Authorization` header.
///
/// Empty header yields the anonymous principal `(*, *, anonymous)`,
/// subject to fail-closed rules in the multi-tenancy enforcement module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityPrincipal {
    pub team: String,
    pub namespace: String,
    pub role: String,
    pub tenant_id: Option<String>,
}

impl SecurityPrincipal {
    pub fn anonymous() -> Self {
        Self {
            team: "*".to_string(),
            namespace: "*".to_string(),
            role: "anonymous".to_string(),
            tenant_id: None,
        }
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

/// `"{repository}::{namespace}::{name}"`, or bare `name` if both
/// `repository` and `namespace` are empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScopedEntityId(pub String);

impl ScopedEntityId {
    #[must_use]
    pub fn new(repository: &str, namespace: &str, name: &str) -> Self {
        if repository.is_empty() && namespace.is_empty() {
            return Self(name.to_string());
        }
        Self(format!("{repository}::{namespace}::{name}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Service,
    Database,
    KafkaTopic,
    K8sDeployment,
}

impl NodeKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            NodeKind::Service => "Service",
            NodeKind::Database => "Database",
            NodeKind::KafkaTopic => "KafkaTopic",
            NodeKind::K8sDeployment => "K8sDeployment",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeKind {
    Calls,
    Produces,
    Consumes,
    DeployedIn,
}

impl EdgeKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            EdgeKind::Calls => "CALLS",
            EdgeKind::Produces => "PRODUCES",
            EdgeKind::Consumes => "CONSUMES",
            EdgeKind::DeployedIn => "DEPLOYED_IN",
        }
    }
}

/// A graph node. Merge identity is always `(primary_key, tenant_id)`
/// jointly; cross-tenant duplicates of the same primary key are allowed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub kind: NodeKind,
    pub primary_key: String,
    pub tenant_id: String,
    pub team_owner: String,
    pub namespace_acl: Vec<String>,
    pub read_roles: Vec<String>,
    pub properties: BTreeMap<String, serde_json::Value>,
}

/// A graph edge. Matches source and target on the same `tenant_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub kind: EdgeKind,
    pub source: String,
    pub target: String,
    pub tenant_id: String,
    pub ingestion_id: String,
    pub last_seen_at: chrono::DateTime<chrono::Utc>,
    pub tombstoned_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl GraphEdge {
    /// Stale once the batch that last wrote it is not the current one.
    #[must_use]
    pub fn is_stale(&self, current_ingestion_id: &str) -> bool {
        self.ingestion_id != current_ingestion_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Shared-across-replicas snapshot of a circuit breaker's state. Local
/// caches are a soft view; the state store is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitStateSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_time: Option<chrono::DateTime<chrono::Utc>>,
    pub half_open_calls: u32,
}

impl Default for CircuitStateSnapshot {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            half_open_calls: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// A job record: created, marked running by a heartbeat, then completed
/// or failed. Evicted by a monotonic TTL; heartbeats extend the lease.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord<T> {
    pub job_id: uuid::Uuid,
    pub status: JobStatus,
    pub result: Option<T>,
    pub error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl<T> JobRecord<T> {
    pub fn new() -> Self {
        Self {
            job_id: uuid::Uuid::new_v4(),
            status: JobStatus::Pending,
            result: None,
            error: None,
            created_at: chrono::Utc::now(),
            completed_at: None,
        }
    }
}

impl<T> Default for JobRecord<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VectorSyncOperation {
    Upsert,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VectorSyncStatus {
    Pending,
    Processed,
    Failed,
}

/// An event queued to synchronize the vector store with a graph commit.
/// At least one of `pruned_ids` or `vectors` must be non-empty for the
/// event's operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSyncEvent {
    pub event_id: uuid::Uuid,
    pub collection: String,
    pub operation: VectorSyncOperation,
    pub pruned_ids: Vec<String>,
    pub vectors: Vec<VectorRecord>,
    pub status: VectorSyncStatus,
    pub retry_count: u32,
}

impl VectorSyncEvent {
    #[must_use]
    pub fn node_id(&self) -> Option<&str> {
        self.pruned_ids
            .first()
            .map(String::as_str)
            .or_else(|| self.vectors.first().map(|v| v.id.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub score: f32,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryComplexity {
    EntityLookup,
    SingleHop,
    MultiHop,
    Aggregate,
}

impl QueryComplexity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            QueryComplexity::EntityLookup => "entity_lookup",
            QueryComplexity::SingleHop => "single_hop",
            QueryComplexity::MultiHop => "multi_hop",
            QueryComplexity::Aggregate => "aggregate",
        }
    }
}
