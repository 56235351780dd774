//! Resilience substrate: circuit breakers, distributed locks and
//! semaphores, bounded task sets.

pub mod circuit_breaker;
pub mod lock;
pub mod task_set;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry, InMemoryStateStore};
pub use lock::{DistributedLock, DistributedSemaphore, LocalFallbackLock, LocalFallbackSemaphore};
pub use task_set::BoundedTaskSet;
