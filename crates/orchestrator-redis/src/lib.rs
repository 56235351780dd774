//! Redis adapter for the distributed-store seams: [`DistributedStore`]
//! (locks, semaphores, generic KV), [`StateStore`] (circuit breaker
//! state), and [`OutboxStore`] (durable vector-sync outbox).
//!
//! All three share one [`redis::aio::ConnectionManager`] — it
//! transparently reconnects, so callers don't need their own retry
//! loop around a dropped connection.

mod distributed_store;
mod outbox_store;
mod state_store;

pub use distributed_store::RedisDistributedStore;
pub use outbox_store::RedisOutboxStore;
pub use state_store::RedisStateStore;

use orchestrator_core::error::{OrchestratorError, Result};
use redis::aio::ConnectionManager;

/// Opens one shared connection manager for a Redis URL. Each adapter
/// wraps a clone of the same manager; `ConnectionManager` is cheap to
/// clone (it's a handle, not a fresh connection).
pub async fn connect(redis_url: &str) -> Result<ConnectionManager> {
    let client = redis::Client::open(redis_url)
        .map_err(|e| OrchestratorError::DistributedStore(format!("invalid redis url: {e}")))?;
    ConnectionManager::new(client)
        .await
        .map_err(|e| OrchestratorError::DistributedStore(format!("failed to connect to redis: {e}")))
}
