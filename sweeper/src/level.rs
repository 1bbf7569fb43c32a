//! Levels
//!
//! A [`Level`] is the set of nodes shown at one depth of the drill-down path.
//! Every node gets a [`ResolutionTask`] when the level is built; as tasks
//! change state the level re-derives its sorted view and publishes it as a
//! fresh immutable snapshot, so readers never observe a partially sorted list.
//!
//! Sort order:
//! 1. metric, largest first
//! 2. settled before pending/running/cancelled
//! 3. name, ascending

use crate::error::{Error, Result};
use crate::node::{Metric, Node};
use crate::pool::ResolutionPool;
use crate::task::{ResolutionTask, TaskObserver, TaskState};
use std::cmp::Reverse;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

type View = Arc<[Arc<ResolutionTask>]>;

/// One rendered row of a level
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub name: String,
    pub metric: Metric,
    pub is_running: bool,
    pub is_selected: bool,
}

/// Outcome of [`Level::select`]
#[derive(Debug, Clone)]
pub enum Selection {
    /// The node was already selected
    Unchanged,
    /// The node is now selected, replacing any earlier selection
    Changed(Arc<Node>),
}

struct LevelShared {
    /// Creation order, never reordered
    items: Vec<Arc<ResolutionTask>>,

    /// Latest sorted snapshot
    sorted: RwLock<View>,

    /// Serializes re-sorts against each other and against discard
    sort_lock: Mutex<()>,

    discarded: AtomicBool,
    selected: Mutex<Option<Arc<ResolutionTask>>>,
    cancel: CancellationToken,
    revision: watch::Sender<u64>,
    error: Option<String>,
}

impl LevelShared {
    fn resort(&self) {
        let _guard = self.sort_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.discarded.load(Ordering::SeqCst) {
            return;
        }

        // Keys are captured once per task so the comparison is a total order
        // even while tasks keep transitioning underneath
        let mut keyed: Vec<_> = self
            .items
            .iter()
            .map(|task| {
                let (state, metric) = task.snapshot();
                let key = (
                    Reverse(metric),
                    state != TaskState::Settled,
                    task.node().name(),
                );
                (key, Arc::clone(task))
            })
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));

        let view: View = keyed.into_iter().map(|(_, task)| task).collect();
        *self.sorted.write().unwrap_or_else(PoisonError::into_inner) = view;
        self.revision.send_modify(|r| *r += 1);
    }

    fn discard(&self) {
        {
            let _guard = self.sort_lock.lock().unwrap_or_else(PoisonError::into_inner);
            if self.discarded.swap(true, Ordering::SeqCst) {
                return;
            }
        }
        self.cancel.cancel();
        for task in &self.items {
            task.cancel();
        }
    }
}

impl TaskObserver for LevelShared {
    fn task_transitioned(&self) {
        self.resort();
    }
}

impl Drop for LevelShared {
    fn drop(&mut self) {
        self.discard();
    }
}

/// Nodes at one depth with live-resolving metrics
#[derive(Clone)]
pub struct Level {
    shared: Arc<LevelShared>,
}

impl fmt::Debug for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Level")
            .field("items", &self.shared.items.len())
            .field("error", &self.shared.error)
            .field("discarded", &self.is_discarded())
            .finish()
    }
}

impl Level {
    /// Build a level and submit one resolution task per node
    pub fn new(nodes: Vec<Arc<Node>>, pool: &ResolutionPool) -> Result<Level> {
        let cancel = CancellationToken::new();
        let (revision, _) = watch::channel(0);
        let mut spawn_error = None;

        let shared = Arc::new_cyclic(|weak: &Weak<LevelShared>| {
            let observer: Weak<dyn TaskObserver> = weak.clone();
            let mut items = Vec::with_capacity(nodes.len());
            for node in nodes {
                match ResolutionTask::spawn(node, pool, cancel.child_token(), observer.clone()) {
                    Ok(task) => items.push(task),
                    Err(e) => {
                        spawn_error = Some(e);
                        break;
                    }
                }
            }

            LevelShared {
                sorted: RwLock::new(items.iter().cloned().collect()),
                items,
                sort_lock: Mutex::new(()),
                discarded: AtomicBool::new(false),
                selected: Mutex::new(None),
                cancel,
                revision,
                error: None,
            }
        });

        if let Some(e) = spawn_error {
            shared.discard();
            return Err(e);
        }

        // Transitions that raced construction had no level to report to
        shared.resort();
        debug!("Level created with {} items", shared.items.len());
        Ok(Level { shared })
    }

    /// Placeholder level for a container whose listing failed
    pub fn failed(message: impl Into<String>) -> Level {
        let (revision, _) = watch::channel(0);
        Level {
            shared: Arc::new(LevelShared {
                items: Vec::new(),
                sorted: RwLock::new(Vec::new().into()),
                sort_lock: Mutex::new(()),
                discarded: AtomicBool::new(false),
                selected: Mutex::new(None),
                cancel: CancellationToken::new(),
                revision,
                error: Some(message.into()),
            }),
        }
    }

    /// Listing error this level stands in for
    pub fn error(&self) -> Option<&str> {
        self.shared.error.as_deref()
    }

    /// Tasks in creation order
    pub fn items(&self) -> &[Arc<ResolutionTask>] {
        &self.shared.items
    }

    /// Current sorted snapshot
    pub fn view(&self) -> Arc<[Arc<ResolutionTask>]> {
        Arc::clone(&self.shared.sorted.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Rows in sorted order
    pub fn rows(&self) -> Vec<Row> {
        self.rows_of(&self.view())
    }

    /// Rows for a snapshot previously taken with [`Level::view`]
    pub fn rows_of(&self, view: &[Arc<ResolutionTask>]) -> Vec<Row> {
        let selected = self.selected_task();
        view.iter()
            .map(|task| {
                let (state, metric) = task.snapshot();
                Row {
                    name: task.node().name().to_string(),
                    metric,
                    is_running: matches!(state, TaskState::Pending | TaskState::Running),
                    is_selected: selected.as_ref().is_some_and(|s| Arc::ptr_eq(s, task)),
                }
            })
            .collect()
    }

    /// Node shown at `row` of the sorted view
    pub fn node_at_row(&self, row: usize) -> Option<Arc<Node>> {
        self.view().get(row).map(|task| Arc::clone(task.node()))
    }

    fn selected_task(&self) -> Option<Arc<ResolutionTask>> {
        self.shared
            .selected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn selected(&self) -> Option<Arc<Node>> {
        self.selected_task().map(|task| Arc::clone(task.node()))
    }

    /// Whether `node` is the current selection; `node` must be an item
    pub fn is_selected(&self, node: &Arc<Node>) -> Result<bool> {
        let task = self.task_of(node)?;
        Ok(self
            .selected_task()
            .is_some_and(|selected| Arc::ptr_eq(&selected, task)))
    }

    fn task_of(&self, node: &Arc<Node>) -> Result<&Arc<ResolutionTask>> {
        self.shared
            .items
            .iter()
            .find(|task| Arc::ptr_eq(task.node(), node))
            .ok_or_else(|| Error::NotInLevel(node.path().to_string()))
    }

    /// Select `node`, replacing any earlier selection
    pub fn select(&self, node: &Arc<Node>) -> Result<Selection> {
        let task = self.task_of(node)?;

        {
            let mut selected = self.shared.selected.lock().unwrap_or_else(PoisonError::into_inner);
            if selected.as_ref().is_some_and(|s| Arc::ptr_eq(s, task)) {
                return Ok(Selection::Unchanged);
            }
            *selected = Some(Arc::clone(task));
        }

        if !self.is_discarded() {
            self.shared.revision.send_modify(|r| *r += 1);
        }
        Ok(Selection::Changed(Arc::clone(node)))
    }

    /// Cancel every task; the level stops updating
    pub fn discard(&self) {
        self.shared.discard();
    }

    pub fn is_discarded(&self) -> bool {
        self.shared.discarded.load(Ordering::SeqCst)
    }

    /// Revision counter that ticks whenever the rows may have changed
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    /// Every task has settled or been cancelled
    pub fn is_settled(&self) -> bool {
        self.shared.items.iter().all(|task| task.is_finished())
    }

    /// Wait until [`Level::is_settled`] or the level is discarded
    pub async fn wait_settled(&self) {
        let mut revisions = self.subscribe();
        while !self.is_settled() {
            tokio::select! {
                changed = revisions.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = self.shared.cancel.cancelled() => break,
            }
        }
    }

    pub fn is_same(&self, other: &Level) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}
