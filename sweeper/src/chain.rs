//! Navigation chain
//!
//! The chain is the single live drill-down path: level 0 holds the root node
//! and level `i + 1` holds the children of whatever is selected at level `i`.
//! Selecting anything at depth `i` invalidates everything deeper.
//!
//! Listing runs here, on the control context, never on the resolution pool.

use crate::error::{Error, Result};
use crate::level::{Level, Selection};
use crate::node::Node;
use crate::pool::ResolutionPool;
use crate::store::BackingStore;
use std::sync::Arc;
use sweeper_common::MetricKind;
use tracing::{debug, info, warn};

/// What an [`NavigationChain::advance`] call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Empty space activated: deeper levels removed, selection kept
    Truncated,
    /// Target was already selected; nothing changed
    Unchanged,
    /// Target selected and its children shown at `depth`
    Expanded { depth: usize },
    /// Target selected; it has no children to show
    Selected,
    /// Target selected but listing failed; error level at `depth`
    ListingFailed { depth: usize },
}

/// Ordered levels of the current drill-down path
pub struct NavigationChain {
    levels: Vec<Level>,
    pool: Arc<ResolutionPool>,
}

impl NavigationChain {
    /// Start a chain whose root level shows `root`
    pub fn new(root: Arc<Node>, pool: Arc<ResolutionPool>) -> Result<Self> {
        info!("Browsing {} ({})", root.path(), root.kind());
        let root_level = Level::new(vec![root], &pool)?;
        Ok(Self {
            levels: vec![root_level],
            pool,
        })
    }

    /// Resolve `path` in `store` and start a chain on it
    pub async fn open(
        store: Arc<dyn BackingStore>,
        path: &str,
        kind: MetricKind,
        pool: Arc<ResolutionPool>,
    ) -> Result<Self> {
        let root = Node::open(store, path, kind).await?;
        Self::new(root, pool)
    }

    /// Levels from the root outwards
    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn level(&self, depth: usize) -> Result<&Level> {
        self.levels.get(depth).ok_or(Error::InvalidLevel(depth))
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn pool(&self) -> &Arc<ResolutionPool> {
        &self.pool
    }

    fn truncate_after(&mut self, depth: usize) {
        if self.levels.len() <= depth + 1 {
            return;
        }
        let removed = self.levels.len() - depth - 1;
        for level in self.levels.drain(depth + 1..) {
            level.discard();
        }
        debug!("Removed {} levels after depth {}", removed, depth);
    }

    /// Move the selection at `depth` to `target`
    ///
    /// `None` means empty space below the list was activated: deeper levels
    /// go away and the selection at `depth` stays. Re-selecting the node that
    /// is already selected changes nothing. The child level is built before
    /// the selection moves, so an error leaves the chain as it was.
    pub async fn advance(&mut self, depth: usize, target: Option<&Arc<Node>>) -> Result<Advance> {
        let level = self.level(depth)?.clone();

        let Some(target) = target else {
            self.truncate_after(depth);
            return Ok(Advance::Truncated);
        };

        if level.is_selected(target)? {
            return Ok(Advance::Unchanged);
        }

        let (child_level, outcome) = match target.children().await {
            Ok([]) => (None, Advance::Selected),
            Ok(children) => (
                Some(Level::new(children.to_vec(), &self.pool)?),
                Advance::Expanded { depth: depth + 1 },
            ),
            Err(e) => {
                warn!("Showing error level for {}: {}", target.path(), e);
                (
                    Some(Level::failed(e.to_string())),
                    Advance::ListingFailed { depth: depth + 1 },
                )
            }
        };

        if let Selection::Unchanged = level.select(target)? {
            return Ok(Advance::Unchanged);
        }
        self.truncate_after(depth);
        debug!("Selected {} at depth {}", target.path(), depth);

        if let Some(child_level) = child_level {
            self.levels.push(child_level);
        }
        Ok(outcome)
    }

    /// Forward activation of `row` of the sorted view at `depth`
    ///
    /// Rows past the end of the list count as empty space.
    pub async fn activate(&mut self, depth: usize, row: usize) -> Result<Advance> {
        let node = self.level(depth)?.node_at_row(row);
        self.advance(depth, node.as_ref()).await
    }

    /// Discard every level, root included
    pub fn close(&mut self) {
        for level in &self.levels {
            level.discard();
        }
    }
}

impl Drop for NavigationChain {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn chain(store: MemoryStore) -> (Arc<MemoryStore>, NavigationChain) {
        let store = Arc::new(store);
        let pool = Arc::new(ResolutionPool::new(5));
        let chain = NavigationChain::open(store.clone(), "/", MetricKind::BytesUsed, pool)
            .await
            .unwrap();
        (store, chain)
    }

    #[tokio::test]
    async fn test_root_level_holds_root() {
        let (_store, chain) = chain(MemoryStore::builder().file("/a", 1).build()).await;

        assert_eq!(chain.len(), 1);
        assert_eq!(chain.levels()[0].items().len(), 1);
        assert_eq!(chain.levels()[0].items()[0].node().name(), "/");
    }

    #[tokio::test]
    async fn test_expand_root() {
        let (_store, mut chain) =
            chain(MemoryStore::builder().file("/a", 1).file("/b", 2).build()).await;

        let outcome = chain.activate(0, 0).await.unwrap();

        assert_eq!(outcome, Advance::Expanded { depth: 1 });
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.levels()[1].items().len(), 2);
    }

    #[tokio::test]
    async fn test_selecting_leaf_adds_no_level() {
        let (_store, mut chain) = chain(MemoryStore::builder().file("/a", 1).build()).await;
        chain.activate(0, 0).await.unwrap();

        let outcome = chain.activate(1, 0).await.unwrap();

        assert_eq!(outcome, Advance::Selected);
        assert_eq!(chain.len(), 2);
    }

    #[tokio::test]
    async fn test_row_past_end_is_empty_space() {
        let (_store, mut chain) = chain(MemoryStore::builder().file("/a/x", 1).build()).await;
        chain.activate(0, 0).await.unwrap();
        chain.activate(1, 0).await.unwrap();
        assert_eq!(chain.len(), 3);

        let outcome = chain.activate(1, 99).await.unwrap();

        assert_eq!(outcome, Advance::Truncated);
        assert_eq!(chain.len(), 2);
        assert!(chain.levels()[1].selected().is_some());
    }

    #[tokio::test]
    async fn test_invalid_depth() {
        let (_store, mut chain) = chain(MemoryStore::builder().file("/a", 1).build()).await;
        assert!(matches!(chain.advance(3, None).await, Err(Error::InvalidLevel(3))));
    }

    #[tokio::test]
    async fn test_listing_failure_becomes_error_level() {
        let (_store, mut chain) =
            chain(MemoryStore::builder().file("/a/x", 1).fail_listing("/a").build()).await;
        chain.activate(0, 0).await.unwrap();

        let outcome = chain.activate(1, 0).await.unwrap();

        assert_eq!(outcome, Advance::ListingFailed { depth: 2 });
        assert!(chain.levels()[2].error().is_some());
        assert!(chain.levels()[2].items().is_empty());
    }

    #[tokio::test]
    async fn test_failed_expansion_leaves_selection_unmoved() {
        let store = Arc::new(MemoryStore::builder().file("/a", 1).build());
        let pool = Arc::new(ResolutionPool::new(1));
        let mut chain = NavigationChain::open(store, "/", MetricKind::BytesUsed, pool.clone())
            .await
            .unwrap();
        pool.shutdown().await;

        assert!(matches!(chain.activate(0, 0).await, Err(Error::PoolClosed)));
        assert_eq!(chain.len(), 1);
        assert!(chain.levels()[0].selected().is_none());

        // Still not selected, so the next attempt tries again
        assert!(matches!(chain.activate(0, 0).await, Err(Error::PoolClosed)));
    }

    #[tokio::test]
    async fn test_close_discards_every_level() {
        let (_store, mut chain) = chain(MemoryStore::builder().file("/a", 1).build()).await;
        chain.activate(0, 0).await.unwrap();
        chain.close();

        assert!(chain.levels().iter().all(|level| level.is_discarded()));
    }
}
