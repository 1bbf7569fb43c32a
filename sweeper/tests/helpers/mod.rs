//! Shared helpers for sweeper integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use sweeper::store::MemoryStore;
use sweeper::{Level, MetricKind, NavigationChain, ResolutionPool};

/// Chain over `store` rooted at "/", with its pool
pub async fn open_chain(
    store: &Arc<MemoryStore>,
    width: usize,
) -> (Arc<ResolutionPool>, NavigationChain) {
    let pool = Arc::new(ResolutionPool::new(width));
    let chain = NavigationChain::open(
        store.clone(),
        "/",
        MetricKind::BytesUsed,
        Arc::clone(&pool),
    )
    .await
    .expect("chain opens");
    (pool, chain)
}

/// Wait until `condition` holds, re-checking on every level revision
pub async fn wait_until<F>(level: &Level, condition: F)
where
    F: Fn(&Level) -> bool,
{
    let mut revisions = level.subscribe();
    while !condition(level) {
        revisions.changed().await.expect("level alive");
    }
}

/// Sorted view holds exactly the level's items, each once
pub fn assert_permutation(level: &Level) {
    let view = level.view();
    assert_eq!(view.len(), level.items().len(), "view size differs from items");

    let items: HashSet<*const _> = level.items().iter().map(Arc::as_ptr).collect();
    let shown: HashSet<*const _> = view.iter().map(Arc::as_ptr).collect();
    assert_eq!(shown.len(), view.len(), "view contains duplicates");
    assert_eq!(items, shown, "view and items differ");
}

/// Names of the rows in sorted order
pub fn row_names(level: &Level) -> Vec<String> {
    level.rows().into_iter().map(|row| row.name).collect()
}

/// Yield until the store has no outstanding metric queries
pub async fn drain(store: &MemoryStore) {
    while store.in_flight() > 0 {
        tokio::task::yield_now().await;
    }
}
