//! Backing store seam
//!
//! The navigation core only needs three queries from a store: resolve a path
//! to a handle, list a container's children, and compute a recursive
//! aggregate for a handle. The aggregate is the expensive one and receives a
//! cancellation token so implementations can abandon in-flight I/O.

use async_trait::async_trait;
use sweeper_common::MetricKind;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod local;
pub mod memory;

pub use local::LocalStore;
pub use memory::MemoryStore;

/// Store handle for one container or leaf
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entry {
    /// Full store path
    pub path: String,

    /// Last path component ("/" for the store root)
    pub name: String,

    /// True for containers (directories), false for leaves
    pub is_container: bool,
}

impl Entry {
    pub fn is_container(&self) -> bool {
        self.is_container
    }
}

/// Backing store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Path does not exist in the store
    #[error("Path not found: {0}")]
    NotFound(String),

    /// Listing requested on a leaf
    #[error("Not a container: {0}")]
    NotAContainer(String),

    /// I/O failure while talking to the store
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Caller cancelled the query
    #[error("Query cancelled")]
    Cancelled,

    /// Store could not serve the request
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Hierarchical store queried by [`crate::node::Node`]
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Resolve a path to a handle
    async fn resolve(&self, path: &str) -> Result<Entry, StoreError>;

    /// List the children of a container, in store order
    async fn list_children(&self, entry: &Entry) -> Result<Vec<Entry>, StoreError>;

    /// Compute the recursive aggregate for a handle
    ///
    /// Implementations should return [`StoreError::Cancelled`] promptly once
    /// `cancel` fires.
    async fn aggregate_metric(
        &self,
        entry: &Entry,
        kind: MetricKind,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError>;
}
