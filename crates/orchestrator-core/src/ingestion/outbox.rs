//! Vector-sync outbox: a coalescing in-memory queue fed inside the same
//! transactional boundary as a graph commit, plus a durable drainer
//! that persists events to a distributed store so a process restart
//! doesn't lose pending syncs.

use crate::error::Result;
use crate::model::{VectorSyncEvent, VectorSyncOperation, VectorSyncStatus};
use crate::traits::{OutboxStore, VectorStore};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Coalesces events by `(collection, node_id)` within `window`: the
/// latest event for a given key wins (an upsert overrides a prior
/// delete and vice versa), carrying the latest `event_id`.
pub struct CoalescingOutbox {
    window: Duration,
    pending: Mutex<HashMap<(String, String), (VectorSyncEvent, Instant)>>,
}

impl CoalescingOutbox {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self { window, pending: Mutex::new(HashMap::new()) }
    }

    /// Enqueues `event`, replacing any prior event for the same
    /// `(collection, node_id)` key still inside the coalescing window.
    /// Events outside the window, or for a node id the event doesn't
    /// carry, are kept distinct.
    pub fn enqueue(&self, event: VectorSyncEvent) {
        let Some(node_id) = event.node_id().map(str::to_string) else {
            let key = (event.collection.clone(), event.event_id.to_string());
            self.pending.lock().insert(key, (event, Instant::now()));
            return;
        };
        let key = (event.collection.clone(), node_id);
        let mut pending = self.pending.lock();
        match pending.get(&key) {
            Some((_, inserted_at)) if inserted_at.elapsed() < self.window => {
                pending.insert(key, (event, Instant::now()));
            }
            _ => {
                pending.insert(key, (event, Instant::now()));
            }
        }
    }

    /// Drains every coalesced event, regardless of window state — used
    /// at commit boundaries where the batch is finished and every
    /// pending event must flush together.
    pub fn drain(&self) -> Vec<VectorSyncEvent> {
        self.pending.lock().drain().map(|(_, (event, _))| event).collect()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Persists outbox events to a distributed store and drains them into
/// the vector store with retry. An event that exceeds `max_retries` is
/// discarded rather than retried forever.
pub struct DurableOutboxDrainer {
    store: Arc<dyn OutboxStore>,
    vector_store: Arc<dyn VectorStore>,
    max_retries: u32,
}

impl DurableOutboxDrainer {
    #[must_use]
    pub fn new(store: Arc<dyn OutboxStore>, vector_store: Arc<dyn VectorStore>, max_retries: u32) -> Self {
        Self { store, vector_store, max_retries }
    }

    pub async fn persist(&self, event: &VectorSyncEvent) -> Result<()> {
        self.store.write_event(event).await
    }

    /// Loads every pending event and attempts to apply it to the vector
    /// store. Failures increment `retry_count` and are re-persisted
    /// rather than removed, unless `max_retries` has been exceeded.
    pub async fn drain_pending(&self) -> Result<DrainReport> {
        let pending = self.store.load_pending().await?;
        let mut report = DrainReport::default();

        for mut event in pending {
            let outcome = match event.operation {
                VectorSyncOperation::Upsert => {
                    self.vector_store.upsert(&event.collection, event.vectors.clone()).await.map(|_| ())
                }
                VectorSyncOperation::Delete => self
                    .vector_store
                    .delete(&event.collection, event.pruned_ids.clone(), None)
                    .await
                    .map(|_| ()),
            };

            match outcome {
                Ok(()) => {
                    event.status = VectorSyncStatus::Processed;
                    self.store.remove(&event.event_id.to_string()).await?;
                    report.processed += 1;
                }
                Err(err) => {
                    event.retry_count += 1;
                    if event.retry_count > self.max_retries {
                        event.status = VectorSyncStatus::Failed;
                        self.store.remove(&event.event_id.to_string()).await?;
                        report.discarded += 1;
                        tracing::warn!(event_id = %event.event_id, error = %err, "outbox event exceeded max retries, discarding");
                    } else {
                        self.store.write_event(&event).await?;
                        report.retried += 1;
                    }
                }
            }
        }

        Ok(report)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub processed: usize,
    pub retried: usize,
    pub discarded: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VectorRecord;
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use std::collections::BTreeMap;

    fn upsert_event(collection: &str, node_id: &str) -> VectorSyncEvent {
        VectorSyncEvent {
            event_id: uuid::Uuid::new_v4(),
            collection: collection.to_string(),
            operation: VectorSyncOperation::Upsert,
            pruned_ids: vec![],
            vectors: vec![VectorRecord { id: node_id.to_string(), vector: vec![0.1, 0.2], metadata: BTreeMap::new() }],
            status: VectorSyncStatus::Pending,
            retry_count: 0,
        }
    }

    fn delete_event(collection: &str, node_id: &str) -> VectorSyncEvent {
        VectorSyncEvent {
            event_id: uuid::Uuid::new_v4(),
            collection: collection.to_string(),
            operation: VectorSyncOperation::Delete,
            pruned_ids: vec![node_id.to_string()],
            vectors: vec![],
            status: VectorSyncStatus::Pending,
            retry_count: 0,
        }
    }

    #[test]
    fn rapid_enqueues_of_the_same_node_coalesce_to_one() {
        let outbox = CoalescingOutbox::new(Duration::from_secs(60));
        for _ in 0..100 {
            outbox.enqueue(upsert_event("services", "svc-a"));
        }
        assert_eq!(outbox.pending_count(), 1);
    }

    #[test]
    fn distinct_nodes_and_collections_are_preserved() {
        let outbox = CoalescingOutbox::new(Duration::from_secs(60));
        outbox.enqueue(upsert_event("services", "svc-a"));
        outbox.enqueue(upsert_event("services", "svc-b"));
        outbox.enqueue(upsert_event("topics", "svc-a"));
        assert_eq!(outbox.pending_count(), 3);
    }

    #[test]
    fn upsert_overrides_a_prior_delete_for_the_same_node() {
        let outbox = CoalescingOutbox::new(Duration::from_secs(60));
        outbox.enqueue(delete_event("services", "svc-a"));
        let upsert = upsert_event("services", "svc-a");
        let latest_id = upsert.event_id;
        outbox.enqueue(upsert);
        let drained = outbox.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].operation, VectorSyncOperation::Upsert);
        assert_eq!(drained[0].event_id, latest_id);
    }

    struct InMemoryOutboxStore {
        events: SyncMutex<HashMap<String, VectorSyncEvent>>,
    }

    impl InMemoryOutboxStore {
        fn new() -> Self {
            Self { events: SyncMutex::new(HashMap::new()) }
        }
    }

    #[async_trait]
    impl OutboxStore for InMemoryOutboxStore {
        async fn write_event(&self, event: &VectorSyncEvent) -> Result<()> {
            self.events.lock().insert(event.event_id.to_string(), event.clone());
            Ok(())
        }
        async fn load_pending(&self) -> Result<Vec<VectorSyncEvent>> {
            Ok(self.events.lock().values().cloned().collect())
        }
        async fn remove(&self, event_id: &str) -> Result<()> {
            self.events.lock().remove(event_id);
            Ok(())
        }
    }

    struct FailingVectorStore;

    #[async_trait]
    impl VectorStore for FailingVectorStore {
        async fn upsert(&self, _collection: &str, _records: Vec<VectorRecord>) -> Result<usize> {
            Err(crate::error::OrchestratorError::VectorStore("down".to_string()))
        }
        async fn search(&self, _collection: &str, _query: Vec<f32>, _limit: usize) -> Result<Vec<crate::model::SearchResult>> {
            Ok(vec![])
        }
        async fn delete(&self, _collection: &str, _ids: Vec<String>, _tenant_id: Option<&str>) -> Result<usize> {
            Err(crate::error::OrchestratorError::VectorStore("down".to_string()))
        }
    }

    struct OkVectorStore;

    #[async_trait]
    impl VectorStore for OkVectorStore {
        async fn upsert(&self, _collection: &str, records: Vec<VectorRecord>) -> Result<usize> {
            Ok(records.len())
        }
        async fn search(&self, _collection: &str, _query: Vec<f32>, _limit: usize) -> Result<Vec<crate::model::SearchResult>> {
            Ok(vec![])
        }
        async fn delete(&self, _collection: &str, ids: Vec<String>, _tenant_id: Option<&str>) -> Result<usize> {
            Ok(ids.len())
        }
    }

    #[tokio::test]
    async fn failed_event_is_retried_until_max_retries_then_discarded() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let drainer = DurableOutboxDrainer::new(store.clone(), Arc::new(FailingVectorStore), 2);
        let event = upsert_event("services", "svc-a");
        store.write_event(&event).await.unwrap();

        drainer.drain_pending().await.unwrap();
        drainer.drain_pending().await.unwrap();
        let report = drainer.drain_pending().await.unwrap();

        assert_eq!(report.discarded, 1);
        assert!(store.load_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn successful_drain_removes_the_event() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let drainer = DurableOutboxDrainer::new(store.clone(), Arc::new(OkVectorStore), 5);
        let event = upsert_event("services", "svc-a");
        store.write_event(&event).await.unwrap();

        let report = drainer.drain_pending().await.unwrap();
        assert_eq!(report.processed, 1);
        assert!(store.load_pending().await.unwrap().is_empty());
    }
}
