//! In-memory store
//!
//! A scripted tree used by the test suites. Metric queries can be held open
//! behind gates, individual paths can be made to fail, and every query is
//! counted so callers can assert how often the store was actually hit.

use super::{BackingStore, Entry, StoreError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use sweeper_common::MetricKind;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct MemoryEntry {
    is_container: bool,
    size: u64,
    children: Vec<String>,
}

fn parent_of(path: &str) -> Option<String> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(path[..idx].to_string()),
        None => Some("/".to_string()),
    }
}

fn name_of(path: &str) -> String {
    if path == "/" {
        return "/".to_string();
    }
    path.rsplit('/').next().unwrap_or(path).to_string()
}

/// Builder for [`MemoryStore`]
#[derive(Debug, Default)]
pub struct MemoryStoreBuilder {
    entries: HashMap<String, MemoryEntry>,
    metric_failures: HashSet<String>,
    listing_failures: HashSet<String>,
    gated: HashSet<String>,
    gate_all: bool,
}

impl MemoryStoreBuilder {
    fn ensure_dir(&mut self, path: &str) {
        if self.entries.contains_key(path) {
            return;
        }
        self.entries.insert(
            path.to_string(),
            MemoryEntry {
                is_container: true,
                size: 0,
                children: Vec::new(),
            },
        );
        if let Some(parent) = parent_of(path) {
            self.ensure_dir(&parent);
            if let Some(p) = self.entries.get_mut(&parent) {
                p.children.push(path.to_string());
            }
        }
    }

    /// Add a container (and any missing ancestors)
    pub fn dir(mut self, path: &str) -> Self {
        self.ensure_dir(path);
        self
    }

    /// Add a leaf of the given size (and any missing ancestors)
    pub fn file(mut self, path: &str, size: u64) -> Self {
        if let Some(parent) = parent_of(path) {
            self.ensure_dir(&parent);
            if let Some(p) = self.entries.get_mut(&parent) {
                p.children.push(path.to_string());
            }
        }
        self.entries.insert(
            path.to_string(),
            MemoryEntry {
                is_container: false,
                size,
                children: Vec::new(),
            },
        );
        self
    }

    /// Make metric queries for `path` fail
    pub fn fail_metric(mut self, path: &str) -> Self {
        self.metric_failures.insert(path.to_string());
        self
    }

    /// Make listing `path` fail
    pub fn fail_listing(mut self, path: &str) -> Self {
        self.listing_failures.insert(path.to_string());
        self
    }

    /// Hold metric queries for `path` until [`MemoryStore::release`]
    pub fn gate(mut self, path: &str) -> Self {
        self.gated.insert(path.to_string());
        self
    }

    /// Hold every metric query until [`MemoryStore::release_all`]
    pub fn gate_all(mut self) -> Self {
        self.gate_all = true;
        self
    }

    pub fn build(mut self) -> MemoryStore {
        self.ensure_dir("/");
        MemoryStore {
            gates: self
                .gated
                .into_iter()
                .map(|path| (path, Arc::new(Semaphore::new(0))))
                .collect(),
            global_gate: self.gate_all.then(|| Arc::new(Semaphore::new(0))),
            entries: self.entries,
            metric_failures: self.metric_failures,
            listing_failures: self.listing_failures,
            metric_queries: Mutex::new(HashMap::new()),
            listing_queries: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
        }
    }
}

/// Scripted in-memory [`BackingStore`]
#[derive(Debug)]
pub struct MemoryStore {
    entries: HashMap<String, MemoryEntry>,
    metric_failures: HashSet<String>,
    listing_failures: HashSet<String>,
    gates: HashMap<String, Arc<Semaphore>>,
    global_gate: Option<Arc<Semaphore>>,
    metric_queries: Mutex<HashMap<String, usize>>,
    listing_queries: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    cancelled: AtomicUsize,
}

/// Decrements the in-flight counter however the query ends
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryStore {
    pub fn builder() -> MemoryStoreBuilder {
        MemoryStoreBuilder::default()
    }

    /// Let held metric queries for `path` complete, now and in future
    pub fn release(&self, path: &str) {
        if let Some(gate) = self.gates.get(path) {
            gate.close();
        }
    }

    /// Lift the global gate
    pub fn release_all(&self) {
        if let Some(gate) = &self.global_gate {
            gate.close();
        }
    }

    /// Metric queries issued for `path`
    pub fn metric_queries(&self, path: &str) -> usize {
        self.metric_queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    /// Listing queries issued for `path`
    pub fn listing_queries(&self, path: &str) -> usize {
        self.listing_queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    /// Metric queries currently outstanding
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of metric queries ever outstanding at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Metric queries that ended through cancellation
    pub fn cancelled_queries(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn count(map: &Mutex<HashMap<String, usize>>, path: &str) {
        *map.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(path.to_string())
            .or_insert(0) += 1;
    }

    fn entry(&self, path: &str) -> Result<&MemoryEntry, StoreError> {
        self.entries
            .get(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    fn handle(&self, path: &str) -> Result<Entry, StoreError> {
        let entry = self.entry(path)?;
        Ok(Entry {
            path: path.to_string(),
            name: name_of(path),
            is_container: entry.is_container,
        })
    }

    fn total(&self, path: &str, kind: MetricKind) -> Result<u64, StoreError> {
        let entry = self.entry(path)?;
        if !entry.is_container {
            return Ok(match kind {
                MetricKind::BytesUsed => entry.size,
                MetricKind::FileCount => 1,
            });
        }
        entry
            .children
            .iter()
            .try_fold(0u64, |acc, child| Ok(acc + self.total(child, kind)?))
    }

    async fn pass_gate(gate: &Semaphore, cancel: &CancellationToken) -> Result<(), StoreError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(StoreError::Cancelled),
            permit = gate.acquire() => {
                // A closed gate is an open door
                if let Ok(permit) = permit {
                    permit.forget();
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn resolve(&self, path: &str) -> Result<Entry, StoreError> {
        self.handle(path)
    }

    async fn list_children(&self, entry: &Entry) -> Result<Vec<Entry>, StoreError> {
        Self::count(&self.listing_queries, &entry.path);
        if self.listing_failures.contains(&entry.path) {
            return Err(StoreError::Unavailable(format!(
                "listing {} refused",
                entry.path
            )));
        }
        let stored = self.entry(&entry.path)?;
        if !stored.is_container {
            return Err(StoreError::NotAContainer(entry.path.clone()));
        }
        stored.children.iter().map(|c| self.handle(c)).collect()
    }

    async fn aggregate_metric(
        &self,
        entry: &Entry,
        kind: MetricKind,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        Self::count(&self.metric_queries, &entry.path);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let gates = self
            .global_gate
            .iter()
            .chain(self.gates.get(&entry.path))
            .cloned()
            .collect::<Vec<_>>();
        for gate in gates {
            if let Err(e) = Self::pass_gate(&gate, cancel).await {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                return Err(e);
            }
        }

        if cancel.is_cancelled() {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Cancelled);
        }

        if self.metric_failures.contains(&entry.path) {
            return Err(StoreError::Unavailable(format!(
                "content summary for {} refused",
                entry.path
            )));
        }

        self.total(&entry.path, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> MemoryStore {
        MemoryStore::builder()
            .file("/a/x", 100)
            .file("/a/y", 200)
            .file("/b", 5)
            .dir("/c")
            .build()
    }

    #[tokio::test]
    async fn test_builder_creates_ancestors_in_order() {
        let store = tree();
        let root = store.resolve("/").await.unwrap();
        let names: Vec<String> = store
            .list_children(&root)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(store.listing_queries("/"), 1);
    }

    #[tokio::test]
    async fn test_aggregates() {
        let store = tree();
        let cancel = CancellationToken::new();
        let a = store.resolve("/a").await.unwrap();
        let root = store.resolve("/").await.unwrap();

        assert_eq!(
            store.aggregate_metric(&a, MetricKind::BytesUsed, &cancel).await.unwrap(),
            300
        );
        assert_eq!(
            store.aggregate_metric(&root, MetricKind::FileCount, &cancel).await.unwrap(),
            3
        );
        assert_eq!(store.metric_queries("/a"), 1);
    }

    #[tokio::test]
    async fn test_gate_blocks_until_released() {
        let store = Arc::new(MemoryStore::builder().file("/f", 9).gate("/f").build());
        let entry = store.resolve("/f").await.unwrap();

        let query = {
            let store = Arc::clone(&store);
            let entry = entry.clone();
            tokio::spawn(async move {
                store
                    .aggregate_metric(&entry, MetricKind::BytesUsed, &CancellationToken::new())
                    .await
            })
        };

        tokio::task::yield_now().await;
        assert!(!query.is_finished());

        store.release("/f");
        assert_eq!(query.await.unwrap().unwrap(), 9);
        assert_eq!(store.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancel_while_gated() {
        let store = MemoryStore::builder().file("/f", 9).gate_all().build();
        let entry = store.resolve("/f").await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = store
            .aggregate_metric(&entry, MetricKind::BytesUsed, &cancel)
            .await;

        assert!(matches!(result, Err(StoreError::Cancelled)));
        assert_eq!(store.cancelled_queries(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryStore::builder()
            .file("/d/f", 1)
            .fail_metric("/d")
            .fail_listing("/d")
            .build();
        let d = store.resolve("/d").await.unwrap();

        assert!(store.list_children(&d).await.is_err());
        assert!(store
            .aggregate_metric(&d, MetricKind::BytesUsed, &CancellationToken::new())
            .await
            .is_err());
    }
}
