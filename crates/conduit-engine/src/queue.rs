use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use conduit_core::error::{ConduitError, Result};
use conduit_core::event::EventBus;
use conduit_core::types::FlowEvent;
use conduit_core::work::{Assignment, Resolution, WorkItem};

type Pending = HashMap<String, (WorkItem, oneshot::Sender<Resolution>)>;

/// Pending human work with one resolution channel per item.
///
/// Items are published on the event bus when enqueued; a human actor (CLI
/// prompt, gateway client, ticketing bridge) answers through [`resolve`].
/// Each item resolves at most once.
///
/// [`resolve`]: HumanWorkQueue::resolve
pub struct HumanWorkQueue {
    pending: Mutex<Pending>,
    assignees: Vec<String>,
    next_assignee: AtomicUsize,
    event_bus: Arc<EventBus>,
}

impl HumanWorkQueue {
    pub fn new(event_bus: Arc<EventBus>, assignees: Vec<String>) -> Self {
        let assignees = if assignees.is_empty() {
            vec!["operations".to_string()]
        } else {
            assignees
        };
        Self {
            pending: Mutex::new(HashMap::new()),
            assignees,
            next_assignee: AtomicUsize::new(0),
            event_bus,
        }
    }

    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn assign(&self, item: &mut WorkItem) -> String {
        if let Some(ref who) = item.assigned_to {
            return who.clone();
        }
        let idx = self.next_assignee.fetch_add(1, Ordering::Relaxed) % self.assignees.len();
        let who = self.assignees[idx].clone();
        item.assigned_to = Some(who.clone());
        who
    }

    async fn enqueue(&self, mut item: WorkItem) -> (Assignment, oneshot::Receiver<Resolution>) {
        let (tx, rx) = oneshot::channel();
        let assigned_to = self.assign(&mut item);
        let assignment = Assignment {
            item_id: item.id.clone(),
            assigned_to,
        };

        info!(
            item_id = %item.id,
            step_id = %item.step_id,
            execution_id = %item.execution_id,
            priority = %item.priority,
            assigned_to = %assignment.assigned_to,
            "Work item queued"
        );

        let event = if item.is_approval() {
            FlowEvent::ApprovalRequested { item: item.clone() }
        } else {
            FlowEvent::WorkItemCreated { item: item.clone() }
        };
        self.pending().insert(item.id.clone(), (item, tx));
        self.event_bus.publish(event);
        (assignment, rx)
    }

    /// Enqueue without waiting for the outcome.
    pub async fn add_work_item(&self, item: WorkItem) -> Assignment {
        self.enqueue(item).await.0
    }

    /// Enqueue and wait until the item is resolved or `timeout` elapses.
    /// Expiry is an error.
    pub async fn await_work_item(&self, item: WorkItem, timeout: Duration) -> Result<Resolution> {
        let step = item.step_id.clone();
        let item_id = item.id.clone();
        let (_, rx) = self.enqueue(item).await;
        match self.wait(&item_id, rx, timeout).await {
            Some(resolution) => Ok(resolution),
            None => Err(ConduitError::WorkItemExpired { step }),
        }
    }

    /// Enqueue an approval and wait for it. Expiry resolves to a synthetic
    /// rejection instead of an error.
    pub async fn request_approval(&self, item: WorkItem, timeout: Duration) -> Resolution {
        let item_id = item.id.clone();
        let (_, rx) = self.enqueue(item).await;
        self.wait(&item_id, rx, timeout)
            .await
            .unwrap_or_else(Resolution::expired)
    }

    /// Wait for a resolution. The item is withdrawn when the deadline passes
    /// or the waiting future is dropped, whichever comes first.
    async fn wait(
        &self,
        item_id: &str,
        rx: oneshot::Receiver<Resolution>,
        timeout: Duration,
    ) -> Option<Resolution> {
        let _withdraw = Withdraw {
            queue: self,
            item_id,
        };
        tokio::time::timeout(timeout, rx).await.ok()?.ok()
    }

    /// Resolve a pending item. Returns true if it was found.
    pub async fn resolve(&self, item_id: &str, resolution: Resolution) -> bool {
        let entry = self.pending().remove(item_id);
        if let Some((item, tx)) = entry {
            debug!(item_id, step_id = %item.step_id, approved = resolution.approved, "Work item resolved");
            self.event_bus.publish(FlowEvent::WorkItemResolved {
                item_id: item_id.to_string(),
                approved: resolution.approved,
            });
            // Nobody waits on escalation items
            let _ = tx.send(resolution);
            true
        } else {
            false
        }
    }

    /// Pending items, highest priority first, oldest first within a priority.
    pub async fn pending_items(&self) -> Vec<WorkItem> {
        let mut items: Vec<WorkItem> = self
            .pending()
            .values()
            .map(|(item, _)| item.clone())
            .collect();
        items.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        items
    }

    pub async fn get(&self, item_id: &str) -> Option<WorkItem> {
        self.pending().get(item_id).map(|(item, _)| item.clone())
    }

    pub async fn pending_count(&self) -> usize {
        self.pending().len()
    }

    /// Find a pending item by prefix match on the ID.
    pub async fn find_by_prefix(&self, prefix: &str) -> Option<String> {
        self.pending()
            .keys()
            .find(|k| k.starts_with(prefix))
            .cloned()
    }
}

/// Drops a still-pending item once nobody waits on it.
struct Withdraw<'a> {
    queue: &'a HumanWorkQueue,
    item_id: &'a str,
}

impl Drop for Withdraw<'_> {
    fn drop(&mut self) {
        // A resolve racing the deadline may already have taken the entry
        let removed = self.queue.pending().remove(self.item_id);
        if removed.is_some() {
            warn!(item_id = self.item_id, "Work item expired");
            self.queue.event_bus.publish(FlowEvent::WorkItemExpired {
                item_id: self.item_id.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use conduit_core::work::{WorkKind, WorkPriority};

    fn queue() -> Arc<HumanWorkQueue> {
        Arc::new(HumanWorkQueue::new(
            Arc::new(EventBus::default()),
            vec!["alice".into(), "bob".into()],
        ))
    }

    fn task(step: &str) -> WorkItem {
        WorkItem::new(step, "e1", "Review", WorkKind::Task, Utc::now())
    }

    fn approval(step: &str) -> WorkItem {
        WorkItem::new(
            step,
            "e1",
            "Approve",
            WorkKind::Approval {
                model: "m".into(),
                confidence: 0.4,
                decision: serde_json::json!("yes"),
                reasoning: String::new(),
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn round_robin_assignment() {
        let q = queue();
        let a = q.add_work_item(task("s1")).await;
        let b = q.add_work_item(task("s2")).await;
        let c = q.add_work_item(task("s3")).await;
        assert_eq!(a.assigned_to, "alice");
        assert_eq!(b.assigned_to, "bob");
        assert_eq!(c.assigned_to, "alice");
        assert_eq!(q.pending_count().await, 3);
    }

    #[tokio::test]
    async fn approval_resolves_once() {
        let q = queue();
        let item = approval("score");
        let id = item.id.clone();

        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.request_approval(item, Duration::from_secs(5)).await })
        };
        while q.get(&id).await.is_none() {
            tokio::task::yield_now().await;
        }
        assert!(q.resolve(&id, Resolution::approve("carol")).await);
        assert!(!q.resolve(&id, Resolution::approve("dave")).await);

        let resolution = waiter.await.unwrap();
        assert!(resolution.approved);
        assert_eq!(resolution.approver, "carol");
    }

    #[tokio::test(start_paused = true)]
    async fn approval_timeout_is_a_rejection() {
        let q = queue();
        let resolution = q
            .request_approval(approval("score"), Duration::from_secs(60))
            .await;
        assert!(!resolution.approved);
        assert!(resolution.timed_out);
        assert_eq!(q.pending_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn work_item_expiry_is_an_error() {
        let q = queue();
        let mut rx = q.event_bus.subscribe();
        let err = q
            .await_work_item(task("review"), Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ConduitError::WorkItemExpired { ref step } if step == "review"));

        let mut saw_expiry = false;
        while let Ok(event) = rx.try_recv() {
            saw_expiry |= matches!(event, FlowEvent::WorkItemExpired { .. });
        }
        assert!(saw_expiry);
    }

    #[tokio::test]
    async fn pending_items_ordered_by_priority() {
        let q = queue();
        q.add_work_item(task("low").with_priority(WorkPriority::Low)).await;
        q.add_work_item(task("crit").with_priority(WorkPriority::Critical)).await;
        q.add_work_item(task("norm")).await;
        let order: Vec<String> = q.pending_items().await.into_iter().map(|i| i.step_id).collect();
        assert_eq!(order, vec!["crit", "norm", "low"]);
    }

    #[tokio::test]
    async fn resolve_unknown_id() {
        let q = queue();
        assert!(!q.resolve("nonexistent", Resolution::approve("x")).await);
    }

    #[tokio::test]
    async fn abandoned_wait_withdraws_the_item() {
        let q = queue();
        let mut rx = q.event_bus.subscribe();
        let waiting = q.await_work_item(task("review"), Duration::from_secs(60));
        let outcome = tokio::time::timeout(Duration::from_millis(10), waiting).await;
        assert!(outcome.is_err());
        assert_eq!(q.pending_count().await, 0);

        let mut saw_expiry = false;
        while let Ok(event) = rx.try_recv() {
            saw_expiry |= matches!(event, FlowEvent::WorkItemExpired { .. });
        }
        assert!(saw_expiry);
    }
}
