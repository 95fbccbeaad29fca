use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use conduit_core::types::{ExecutionMetrics, ExecutionSnapshot, ExecutionStatus};

use crate::context::ExecutionContext;

#[derive(Default)]
struct Registry {
    active: HashMap<String, Arc<ExecutionContext>>,
    finished: HashMap<String, Arc<ExecutionContext>>,
    /// Finish order, oldest first.
    order: VecDeque<String>,
}

/// Live and recently finished executions.
///
/// Finished runs are kept in a bounded FIFO; running ones are never evicted.
/// At least the most recently finished run is always retained.
pub struct ExecutionHistory {
    inner: RwLock<Registry>,
    max_retained: usize,
}

impl ExecutionHistory {
    pub fn new(max_retained: usize) -> Self {
        Self {
            inner: RwLock::new(Registry::default()),
            max_retained: max_retained.max(1),
        }
    }

    pub async fn track(&self, ctx: Arc<ExecutionContext>) {
        self.inner
            .write()
            .await
            .active
            .insert(ctx.execution_id().to_string(), ctx);
    }

    /// Move a finished run into the retained history, evicting the oldest.
    pub async fn archive(&self, execution_id: &str) {
        let mut inner = self.inner.write().await;
        let Some(ctx) = inner.active.remove(execution_id) else {
            return;
        };
        inner.finished.insert(execution_id.to_string(), ctx);
        inner.order.push_back(execution_id.to_string());
        while inner.order.len() > self.max_retained {
            if let Some(oldest) = inner.order.pop_front() {
                inner.finished.remove(&oldest);
                debug!(execution_id = %oldest, "Evicted execution from history");
            }
        }
    }

    pub async fn get(&self, execution_id: &str) -> Option<Arc<ExecutionContext>> {
        let inner = self.inner.read().await;
        inner
            .active
            .get(execution_id)
            .or_else(|| inner.finished.get(execution_id))
            .cloned()
    }

    pub async fn len(&self) -> usize {
        let inner = self.inner.read().await;
        inner.active.len() + inner.finished.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn all(&self) -> Vec<Arc<ExecutionContext>> {
        let inner = self.inner.read().await;
        inner
            .active
            .values()
            .chain(inner.finished.values())
            .cloned()
            .collect()
    }

    /// Snapshots of every known execution, newest start first.
    pub async fn snapshots(&self) -> Vec<ExecutionSnapshot> {
        let mut snapshots = Vec::new();
        for ctx in self.all().await {
            snapshots.push(ctx.snapshot().await);
        }
        snapshots.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        snapshots
    }

    pub async fn metrics(&self, pending_work_items: usize) -> ExecutionMetrics {
        let mut metrics = ExecutionMetrics {
            pending_work_items,
            ..ExecutionMetrics::default()
        };
        let mut completed_ms = Vec::new();

        for snap in self.snapshots().await {
            metrics.total += 1;
            match snap.status {
                ExecutionStatus::Running => metrics.running += 1,
                ExecutionStatus::Paused => metrics.paused += 1,
                ExecutionStatus::Completed => {
                    metrics.completed += 1;
                    if let Some(ms) = snap.duration_ms() {
                        completed_ms.push(ms);
                    }
                }
                ExecutionStatus::Failed => metrics.failed += 1,
                ExecutionStatus::Escalated => metrics.escalated += 1,
            }
        }

        if !completed_ms.is_empty() {
            let total: u64 = completed_ms.iter().sum();
            metrics.average_duration_ms = Some(total as f64 / completed_ms.len() as f64);
        }
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(id: &str) -> Arc<ExecutionContext> {
        Arc::new(ExecutionContext::new("f", id, json!({}), []))
    }

    #[tokio::test]
    async fn evicts_oldest_finished_only() {
        let history = ExecutionHistory::new(2);
        for id in ["a", "b", "c"] {
            let c = ctx(id);
            history.track(c.clone()).await;
            c.finish(ExecutionStatus::Completed).await;
            history.archive(id).await;
        }
        let running = ctx("live");
        history.track(running).await;

        assert!(history.get("a").await.is_none());
        assert!(history.get("b").await.is_some());
        assert!(history.get("c").await.is_some());
        assert!(history.get("live").await.is_some());
        assert_eq!(history.len().await, 3);
    }

    #[tokio::test]
    async fn zero_retention_keeps_the_latest_run() {
        let history = ExecutionHistory::new(0);
        for id in ["first", "second"] {
            let c = ctx(id);
            history.track(c.clone()).await;
            c.finish(ExecutionStatus::Completed).await;
            history.archive(id).await;
        }
        assert!(history.get("first").await.is_none());
        assert!(history.get("second").await.is_some());
        assert_eq!(history.len().await, 1);
    }

    #[tokio::test]
    async fn metrics_count_by_status() {
        let history = ExecutionHistory::new(10);
        let done = ctx("done");
        let failed = ctx("failed");
        let running = ctx("running");
        for c in [&done, &failed, &running] {
            history.track(c.clone()).await;
        }
        done.finish(ExecutionStatus::Completed).await;
        history.archive("done").await;
        failed.finish(ExecutionStatus::Failed).await;
        history.archive("failed").await;

        let m = history.metrics(4).await;
        assert_eq!(m.total, 3);
        assert_eq!(m.completed, 1);
        assert_eq!(m.failed, 1);
        assert_eq!(m.running, 1);
        assert_eq!(m.pending_work_items, 4);
        assert!(m.average_duration_ms.is_some());
    }
}
