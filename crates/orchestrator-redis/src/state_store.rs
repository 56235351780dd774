use async_trait::async_trait;
use orchestrator_core::error::{OrchestratorError, Result};
use orchestrator_core::model::CircuitStateSnapshot;
use orchestrator_core::traits::StateStore;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

const KEY_PREFIX: &str = "circuit_breaker:";

pub struct RedisStateStore {
    conn: ConnectionManager,
}

impl RedisStateStore {
    #[must_use]
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn key(breaker_name: &str) -> String {
        format!("{KEY_PREFIX}{breaker_name}")
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn load(&self, breaker_name: &str) -> Result<Option<CircuitStateSnapshot>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(Self::key(breaker_name))
            .await
            .map_err(|e| OrchestratorError::DistributedStore(format!("GET failed: {e}")))?;
        raw.map(|s| serde_json::from_str(&s).map_err(OrchestratorError::Serialization))
            .transpose()
    }

    async fn save(&self, breaker_name: &str, snapshot: &CircuitStateSnapshot) -> Result<()> {
        let serialized = serde_json::to_string(snapshot)?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(Self::key(breaker_name), serialized)
            .await
            .map_err(|e| OrchestratorError::DistributedStore(format!("SET failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_namespaces_breaker_name() {
        assert_eq!(RedisStateStore::key("neo4j"), "circuit_breaker:neo4j");
    }
}
