//! Resolution tasks
//!
//! A [`ResolutionTask`] resolves one node's metric on the resolution pool and
//! reports every state transition to its observer (the owning level).
//!
//! ```text
//! Pending ──► Running ──► Settled
//!    │           │
//!    └───────────┴──────► Cancelled
//! ```
//!
//! State and result live behind one lock so an observer never sees a settled
//! task without its value, and a cancelled task never picks up a late value.

use crate::error::Result;
use crate::node::{Metric, Node};
use crate::pool::ResolutionPool;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Lifecycle of a resolution task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Queued on the pool
    Pending,
    /// Store query in flight
    Running,
    /// Result recorded
    Settled,
    /// Abandoned; any late result is discarded
    Cancelled,
}

/// Receives task state transitions
pub trait TaskObserver: Send + Sync {
    fn task_transitioned(&self);
}

/// One node's metric query as a cancellable unit of pool work
pub struct ResolutionTask {
    node: Arc<Node>,
    status: Mutex<(TaskState, Metric)>,
    cancel: CancellationToken,
    observer: Weak<dyn TaskObserver>,
}

impl std::fmt::Debug for ResolutionTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (state, result) = self.snapshot();
        f.debug_struct("ResolutionTask")
            .field("node", &self.node.path())
            .field("state", &state)
            .field("result", &result)
            .finish()
    }
}

impl ResolutionTask {
    /// Create the task and submit it to `pool` immediately
    pub fn spawn(
        node: Arc<Node>,
        pool: &ResolutionPool,
        cancel: CancellationToken,
        observer: Weak<dyn TaskObserver>,
    ) -> Result<Arc<Self>> {
        let task = Arc::new(Self {
            node,
            status: Mutex::new((TaskState::Pending, Metric::Unresolved)),
            cancel,
            observer,
        });

        let job = Arc::clone(&task);
        pool.submit(async move { job.run().await })?;
        Ok(task)
    }

    async fn run(self: Arc<Self>) {
        {
            let mut status = self.lock();
            if status.0 != TaskState::Pending {
                return;
            }
            status.0 = TaskState::Running;
        }
        debug!("Resolving {}", self.node.path());
        self.notify();

        let metric = self.node.metric(&self.cancel).await;

        {
            let mut status = self.lock();
            if status.0 != TaskState::Running {
                debug!("Discarding result for cancelled {}", self.node.path());
                return;
            }
            *status = (TaskState::Settled, metric);
        }
        debug!("Resolved {}: {:?}", self.node.path(), metric);
        self.notify();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, (TaskState, Metric)> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        if let Some(observer) = self.observer.upgrade() {
            observer.task_transitioned();
        }
    }

    /// Request cooperative cancellation
    ///
    /// The in-flight store query sees the cancellation token; whatever it
    /// returns afterwards is ignored. Cancelling a settled task is a no-op.
    pub fn cancel(&self) {
        {
            let mut status = self.lock();
            if status.0 == TaskState::Settled || status.0 == TaskState::Cancelled {
                return;
            }
            status.0 = TaskState::Cancelled;
        }
        self.cancel.cancel();
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn state(&self) -> TaskState {
        self.lock().0
    }

    /// Settled metric, or unresolved
    pub fn result(&self) -> Metric {
        self.lock().1
    }

    /// State and result read together
    pub fn snapshot(&self) -> (TaskState, Metric) {
        *self.lock()
    }

    /// Pending or running
    pub fn is_running(&self) -> bool {
        matches!(self.state(), TaskState::Pending | TaskState::Running)
    }

    pub fn is_settled(&self) -> bool {
        self.state() == TaskState::Settled
    }

    /// Settled or cancelled: no further transitions will happen
    pub fn is_finished(&self) -> bool {
        matches!(self.state(), TaskState::Settled | TaskState::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use sweeper_common::MetricKind;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct CountingObserver {
        transitions: AtomicUsize,
        notify: Notify,
    }

    impl TaskObserver for CountingObserver {
        fn task_transitioned(&self) {
            self.transitions.fetch_add(1, Ordering::SeqCst);
            self.notify.notify_one();
        }
    }

    async fn node(store: &Arc<MemoryStore>, path: &str) -> Arc<Node> {
        Node::open(store.clone(), path, MetricKind::BytesUsed)
            .await
            .unwrap()
    }

    async fn wait_for(task: &ResolutionTask, observer: &CountingObserver, state: TaskState) {
        while task.state() != state {
            observer.notify.notified().await;
        }
    }

    #[tokio::test]
    async fn test_task_settles_and_notifies() {
        let store = Arc::new(MemoryStore::builder().file("/f", 12).build());
        let pool = ResolutionPool::new(1);
        let observer = Arc::new(CountingObserver::default());
        let weak: Weak<dyn TaskObserver> = Arc::downgrade(&observer) as Weak<dyn TaskObserver>;

        let task = ResolutionTask::spawn(node(&store, "/f").await, &pool, CancellationToken::new(), weak)
            .unwrap();
        wait_for(&task, &observer, TaskState::Settled).await;

        assert_eq!(task.result(), Metric::Value(12));
        assert!(task.is_finished());
        // Pending -> Running, Running -> Settled
        assert_eq!(observer.transitions.load(Ordering::SeqCst), 2);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_running_task_discards_result() {
        let store = Arc::new(MemoryStore::builder().file("/f", 12).gate("/f").build());
        let pool = ResolutionPool::new(1);
        let observer = Arc::new(CountingObserver::default());
        let weak: Weak<dyn TaskObserver> = Arc::downgrade(&observer) as Weak<dyn TaskObserver>;

        let task = ResolutionTask::spawn(node(&store, "/f").await, &pool, CancellationToken::new(), weak)
            .unwrap();
        wait_for(&task, &observer, TaskState::Running).await;

        task.cancel();
        store.release("/f");
        while store.in_flight() > 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(task.state(), TaskState::Cancelled);
        assert_eq!(task.result(), Metric::Unresolved);
        assert_eq!(observer.transitions.load(Ordering::SeqCst), 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_before_start_skips_query() {
        let store = Arc::new(MemoryStore::builder().file("/a", 1).file("/b", 2).gate("/a").build());
        let pool = ResolutionPool::new(1);
        let observer = Arc::new(CountingObserver::default());
        let weak: Weak<dyn TaskObserver> = Arc::downgrade(&observer) as Weak<dyn TaskObserver>;

        // Occupies the only worker
        let blocker = ResolutionTask::spawn(
            node(&store, "/a").await,
            &pool,
            CancellationToken::new(),
            weak.clone(),
        )
        .unwrap();
        let queued = ResolutionTask::spawn(node(&store, "/b").await, &pool, CancellationToken::new(), weak)
            .unwrap();

        queued.cancel();
        store.release("/a");
        wait_for(&blocker, &observer, TaskState::Settled).await;
        while pool.queue_len() > 0 || pool.active_count() > 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(queued.state(), TaskState::Cancelled);
        assert_eq!(store.metric_queries("/b"), 0);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_settled_task_is_noop() {
        let store = Arc::new(MemoryStore::builder().file("/f", 3).build());
        let pool = ResolutionPool::new(1);
        let observer = Arc::new(CountingObserver::default());
        let weak: Weak<dyn TaskObserver> = Arc::downgrade(&observer) as Weak<dyn TaskObserver>;

        let task = ResolutionTask::spawn(node(&store, "/f").await, &pool, CancellationToken::new(), weak)
            .unwrap();
        wait_for(&task, &observer, TaskState::Settled).await;
        task.cancel();

        assert_eq!(task.state(), TaskState::Settled);
        assert_eq!(task.result(), Metric::Value(3));
        pool.shutdown().await;
    }
}
