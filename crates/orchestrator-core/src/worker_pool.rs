//! Shared CPU worker pool for reranking and structural-similarity work.
//! Request-handling tasks hand CPU-bound scoring off to this pool rather
//! than running it inline on the async executor's own worker threads.

use tokio::sync::oneshot;

pub struct WorkerPools {
    rerank: rayon::ThreadPool,
}

impl WorkerPools {
    #[must_use]
    pub fn new(rerank_workers: usize) -> Self {
        let rerank = rayon::ThreadPoolBuilder::new()
            .num_threads(rerank_workers.max(1))
            .thread_name(|i| format!("rerank-{i}"))
            .build()
            .unwrap_or_else(|_| rayon::ThreadPoolBuilder::new().num_threads(1).build().expect("single-threaded pool always builds"));
        Self { rerank }
    }

    /// Runs a CPU-bound closure on the rerank pool and awaits its result
    /// without blocking the calling task's own executor thread. Panics in
    /// `f` propagate once the sender is dropped without sending.
    pub async fn run_rerank<F, T>(&self, f: F) -> T
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.rerank.spawn(move || {
            let _ = tx.send(f());
        });
        rx.await.expect("rerank task dropped its result sender")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_closure_off_the_async_executor() {
        let pools = WorkerPools::new(2);
        let result = pools.run_rerank(|| 2 + 2).await;
        assert_eq!(result, 4);
    }

    #[tokio::test]
    async fn falls_back_to_one_worker_on_zero_request() {
        let pools = WorkerPools::new(0);
        let result = pools.run_rerank(|| "ok").await;
        assert_eq!(result, "ok");
    }
}
