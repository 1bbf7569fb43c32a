//! # Sweeper Common Library
//!
//! Shared code for the sweeper workspace:
//! - Error types
//! - Configuration loading (metric kind, root path, pool width, logging)
//! - Human-scale metric formatting

pub mod config;
pub mod error;
pub mod format;

pub use config::MetricKind;
pub use error::{Error, Result};
