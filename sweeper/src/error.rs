//! Error types for the sweeper navigation core
//!
//! Metric failures never surface here: they are absorbed by [`crate::node::Node`]
//! as an unresolved metric. Listing failures do, since a level cannot be
//! built without knowing the structure below the selection.

use crate::store::StoreError;
use thiserror::Error;

/// Main error type for the navigation core
#[derive(Error, Debug)]
pub enum Error {
    /// Backing store query failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Child listing of a container failed
    #[error("Failed to list {path}: {source}")]
    Listing {
        path: String,
        #[source]
        source: StoreError,
    },

    /// Work submitted after the resolution pool shut down
    #[error("Resolution pool is shut down")]
    PoolClosed,

    /// Level index outside the current chain
    #[error("No level at depth {0}")]
    InvalidLevel(usize),

    /// Node is not an item of the level it was selected in
    #[error("Node not in level: {0}")]
    NotInLevel(String),

    /// Console I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Shared configuration or input error
    #[error(transparent)]
    Common(#[from] sweeper_common::Error),
}

/// Convenience Result type using the navigation core Error
pub type Result<T> = std::result::Result<T, Error>;
