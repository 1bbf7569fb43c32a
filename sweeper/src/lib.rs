//! # Sweeper Navigation Library
//!
//! Drill-down browser core for hierarchical stores whose per-container
//! aggregates (bytes used, file count) are expensive to compute.
//!
//! **Architecture:**
//! - [`node::Node`]: lazily materialized tree over a [`store::BackingStore`],
//!   metric and child list each memoized with single-flight semantics
//! - [`pool::ResolutionPool`]: owned, fixed-width worker pool for metric queries
//! - [`task::ResolutionTask`]: one node's metric query, cancellable
//! - [`level::Level`]: the nodes at one depth with a live sorted view
//! - [`chain::NavigationChain`]: the single selected path of levels

pub mod chain;
pub mod console;
pub mod error;
pub mod level;
pub mod node;
pub mod pool;
pub mod store;
pub mod task;

pub use chain::{Advance, NavigationChain};
pub use error::{Error, Result};
pub use level::{Level, Row};
pub use node::{Metric, Node};
pub use pool::ResolutionPool;
pub use store::{BackingStore, Entry, StoreError};
pub use sweeper_common::MetricKind;
pub use task::{ResolutionTask, TaskState};
