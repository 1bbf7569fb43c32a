//! Lazy tree nodes
//!
//! A [`Node`] wraps one store handle. Its aggregate metric and its child list
//! are each fetched at most once per session and then shared by every level
//! that shows the node. Both caches are single-flight: concurrent first
//! callers wait on the one outstanding store query instead of issuing their
//! own.

use crate::error::{Error, Result};
use crate::store::{BackingStore, Entry, StoreError};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use sweeper_common::MetricKind;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Aggregate value of a node
///
/// `Unresolved` stands for "not known": never computed, still computing,
/// or failed. It orders below every resolved value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Metric {
    #[default]
    Unresolved,
    Value(u64),
}

impl Metric {
    pub fn value(&self) -> Option<u64> {
        match self {
            Metric::Unresolved => None,
            Metric::Value(v) => Some(*v),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Metric::Value(_))
    }
}

impl Ord for Metric {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Metric::Unresolved, Metric::Unresolved) => Ordering::Equal,
            (Metric::Unresolved, Metric::Value(_)) => Ordering::Less,
            (Metric::Value(_), Metric::Unresolved) => Ordering::Greater,
            (Metric::Value(a), Metric::Value(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Metric {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One container or leaf of the browsed tree
pub struct Node {
    entry: Entry,
    display_name: String,
    kind: MetricKind,
    store: Arc<dyn BackingStore>,
    metric: OnceCell<Metric>,
    children: OnceCell<Vec<Arc<Node>>>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("path", &self.entry.path)
            .field("metric", &self.metric.get())
            .field("children", &self.children.get().map(Vec::len))
            .finish()
    }
}

impl Node {
    /// Resolve `path` in the store and wrap it as a root node
    pub async fn open(
        store: Arc<dyn BackingStore>,
        path: &str,
        kind: MetricKind,
    ) -> Result<Arc<Node>> {
        let entry = store.resolve(path).await?;
        debug!("Opened {} (container={})", entry.path, entry.is_container);
        Ok(Self::from_entry(store, entry, kind))
    }

    /// Wrap a handle the store already produced
    pub fn from_entry(store: Arc<dyn BackingStore>, entry: Entry, kind: MetricKind) -> Arc<Node> {
        let display_name = if entry.is_container && entry.name != "/" {
            format!("/{}", entry.name)
        } else {
            entry.name.clone()
        };
        // Leaves have no structure to fetch
        let children = if entry.is_container {
            OnceCell::new()
        } else {
            OnceCell::new_with(Some(Vec::new()))
        };

        Arc::new(Node {
            entry,
            display_name,
            kind,
            store,
            metric: OnceCell::new(),
            children,
        })
    }

    /// Display name; containers carry a leading `/`
    pub fn name(&self) -> &str {
        &self.display_name
    }

    pub fn path(&self) -> &str {
        &self.entry.path
    }

    pub fn is_container(&self) -> bool {
        self.entry.is_container
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Memoized metric, if a query has already completed
    pub fn cached_metric(&self) -> Option<Metric> {
        self.metric.get().copied()
    }

    /// Aggregate metric, computed on first use
    ///
    /// A store failure is logged and cached as [`Metric::Unresolved`]. A query
    /// that ends because `cancel` fired caches nothing, so the next caller
    /// issues a fresh query.
    pub async fn metric(&self, cancel: &CancellationToken) -> Metric {
        let result = self
            .metric
            .get_or_try_init(|| async {
                debug!("Querying {} of {}", self.kind, self.entry.path);
                match self
                    .store
                    .aggregate_metric(&self.entry, self.kind, cancel)
                    .await
                {
                    Ok(value) => Ok(Metric::Value(value)),
                    Err(StoreError::Cancelled) => Err(StoreError::Cancelled),
                    Err(e) => {
                        warn!("Failed to get {} of {}: {}", self.kind, self.entry.path, e);
                        Ok(Metric::Unresolved)
                    }
                }
            })
            .await;

        match result {
            Ok(metric) => *metric,
            Err(_) => Metric::Unresolved,
        }
    }

    /// Child nodes, listed on first use
    ///
    /// Listing failures are returned to the caller and not cached.
    pub async fn children(&self) -> Result<&[Arc<Node>]> {
        let children = self
            .children
            .get_or_try_init(|| async {
                let entries = self.store.list_children(&self.entry).await.map_err(|source| {
                    warn!("Failed to list {}: {}", self.entry.path, source);
                    Error::Listing {
                        path: self.entry.path.clone(),
                        source,
                    }
                })?;
                debug!("Listed {} children of {}", entries.len(), self.entry.path);
                Ok::<_, Error>(
                    entries
                        .into_iter()
                        .map(|entry| Self::from_entry(Arc::clone(&self.store), entry, self.kind))
                        .collect(),
                )
            })
            .await?;
        Ok(children.as_slice())
    }
}
