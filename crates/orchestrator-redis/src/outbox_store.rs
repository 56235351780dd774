use async_trait::async_trait;
use orchestrator_core::error::{OrchestratorError, Result};
use orchestrator_core::model::VectorSyncEvent;
use orchestrator_core::traits::OutboxStore;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

const PENDING_SET: &str = "outbox:pending";
const EVENT_KEY_PREFIX: &str = "outbox:event:";

pub struct RedisOutboxStore {
    conn: ConnectionManager,
}

impl RedisOutboxStore {
    #[must_use]
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn event_key(event_id: &str) -> String {
        format!("{EVENT_KEY_PREFIX}{event_id}")
    }
}

#[async_trait]
impl OutboxStore for RedisOutboxStore {
    async fn write_event(&self, event: &VectorSyncEvent) -> Result<()> {
        let event_id = event.event_id.to_string();
        let serialized = serde_json::to_string(event)?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(Self::event_key(&event_id), serialized)
            .await
            .map_err(|e| OrchestratorError::DistributedStore(format!("SET failed: {e}")))?;
        conn.sadd::<_, _, ()>(PENDING_SET, &event_id)
            .await
            .map_err(|e| OrchestratorError::DistributedStore(format!("SADD failed: {e}")))
    }

    async fn load_pending(&self) -> Result<Vec<VectorSyncEvent>> {
        let mut conn = self.conn.clone();
        let event_ids: Vec<String> = conn
            .smembers(PENDING_SET)
            .await
            .map_err(|e| OrchestratorError::DistributedStore(format!("SMEMBERS failed: {e}")))?;

        if event_ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = event_ids.iter().map(|id| Self::event_key(id)).collect();
        let raw: Vec<Option<String>> = conn
            .mget(&keys)
            .await
            .map_err(|e| OrchestratorError::DistributedStore(format!("MGET failed: {e}")))?;

        let mut events = Vec::with_capacity(raw.len());
        for entry in raw.into_iter().flatten() {
            events.push(serde_json::from_str(&entry)?);
        }
        Ok(events)
    }

    async fn remove(&self, event_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.srem::<_, _, ()>(PENDING_SET, event_id)
            .await
            .map_err(|e| OrchestratorError::DistributedStore(format!("SREM failed: {e}")))?;
        conn.del::<_, ()>(Self::event_key(event_id))
            .await
            .map_err(|e| OrchestratorError::DistributedStore(format!("DEL failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_key_is_namespaced() {
        assert_eq!(RedisOutboxStore::event_key("abc"), "outbox:event:abc");
    }
}
