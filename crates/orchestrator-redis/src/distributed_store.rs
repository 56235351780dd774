use async_trait::async_trait;
use orchestrator_core::error::{OrchestratorError, Result};
use orchestrator_core::traits::DistributedStore;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

/// Unlocks only if the caller still holds the lock token, the same
/// check-then-delete dance as the Redlock reference implementation:
/// a plain GET-then-DEL from the client would race another holder
/// that acquired the key in between.
const COMPARE_AND_DELETE_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
";

pub struct RedisDistributedStore {
    conn: ConnectionManager,
}

impl RedisDistributedStore {
    #[must_use]
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl DistributedStore for RedisDistributedStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key)
            .await
            .map_err(|e| OrchestratorError::DistributedStore(format!("GET failed: {e}")))
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let mut conn = self.conn.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(|e| OrchestratorError::DistributedStore(format!("SET NX EX failed: {e}")))?;
        Ok(result.is_some())
    }

    async fn compare_and_delete(&self, key: &str, expected_value: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = redis::Script::new(COMPARE_AND_DELETE_SCRIPT)
            .key(key)
            .arg(expected_value)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| OrchestratorError::DistributedStore(format!("compare-and-delete failed: {e}")))?;
        Ok(deleted > 0)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = conn
            .del(key)
            .await
            .map_err(|e| OrchestratorError::DistributedStore(format!("DEL failed: {e}")))?;
        Ok(deleted > 0)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut deleted: u64 = 0;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(500)
                .query_async(&mut conn)
                .await
                .map_err(|e| OrchestratorError::DistributedStore(format!("SCAN failed: {e}")))?;

            if !keys.is_empty() {
                let removed: i64 = conn
                    .del(&keys)
                    .await
                    .map_err(|e| OrchestratorError::DistributedStore(format!("DEL (batch) failed: {e}")))?;
                deleted += removed.max(0) as u64;
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(deleted)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(key, member, score)
            .await
            .map_err(|e| OrchestratorError::DistributedStore(format!("ZADD failed: {e}")))
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<u64> {
        let mut conn = self.conn.clone();
        conn.zrembyscore(key, min, max)
            .await
            .map_err(|e| OrchestratorError::DistributedStore(format!("ZREMRANGEBYSCORE failed: {e}")))
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        conn.zcard(key)
            .await
            .map_err(|e| OrchestratorError::DistributedStore(format!("ZCARD failed: {e}")))
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .zrem(key, member)
            .await
            .map_err(|e| OrchestratorError::DistributedStore(format!("ZREM failed: {e}")))?;
        Ok(removed > 0)
    }
}
