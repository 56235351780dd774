//! Bounded background task set: caps concurrent spawned tasks, drains
//! with a timeout on shutdown.

use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

pub struct BoundedTaskSet {
    limit: usize,
    handles: Vec<JoinHandle<()>>,
}

impl BoundedTaskSet {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            handles: Vec::new(),
        }
    }

    /// Spawns `future` if under the limit; otherwise drops it without
    /// spawning and returns `false` (the caller's documented
    /// "rejects and cancels" contract: an un-spawned future is
    /// immediately dropped rather than ever starting).
    pub fn try_add<F>(&mut self, future: F) -> bool
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.handles.retain(|h| !h.is_finished());
        if self.handles.len() >= self.limit {
            return false;
        }
        self.handles.push(tokio::spawn(future));
        true
    }

    #[must_use]
    pub fn active_count(&mut self) -> usize {
        self.handles.retain(|h| !h.is_finished());
        self.handles.len()
    }

    /// Awaits all pending tasks up to `timeout_duration`, returning the
    /// number that completed before the deadline.
    pub async fn drain_all(&mut self, timeout_duration: Duration) -> usize {
        let handles = std::mem::take(&mut self.handles);
        let mut drained = 0;
        for handle in handles {
            if timeout(timeout_duration, handle).await.is_ok() {
                drained += 1;
            }
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn try_add_rejects_above_limit() {
        let mut set = BoundedTaskSet::new(1);
        assert!(set.try_add(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }));
        assert!(!set.try_add(async {}));
    }

    #[tokio::test]
    async fn drain_all_awaits_pending_tasks() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut set = BoundedTaskSet::new(4);
        for _ in 0..3 {
            let counter = counter.clone();
            set.try_add(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        let drained = set.drain_all(Duration::from_secs(1)).await;
        assert_eq!(drained, 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn active_count_reflects_running_tasks() {
        let mut set = BoundedTaskSet::new(4);
        set.try_add(async {
            tokio::time::sleep(Duration::from_millis(100)).await;
        });
        assert_eq!(set.active_count(), 1);
    }
}
