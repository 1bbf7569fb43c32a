//! Local filesystem store
//!
//! Blocking filesystem calls run on the runtime's blocking thread pool, so
//! neither the control context nor the bounded resolution pool ever blocks
//! on disk I/O directly. Symlinks are reported as leaves and never followed.

use super::{BackingStore, Entry, StoreError};
use async_trait::async_trait;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use sweeper_common::MetricKind;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Backing store over the local filesystem
#[derive(Debug, Clone, Default)]
pub struct LocalStore;

impl LocalStore {
    pub fn new() -> Self {
        Self
    }
}

fn entry_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    if source.kind() == ErrorKind::NotFound {
        StoreError::NotFound(path.display().to_string())
    } else {
        StoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Unavailable(format!("blocking task failed: {}", e)))?
}

fn list_dir(path: &Path) -> Result<Vec<Entry>, StoreError> {
    let mut entries = Vec::new();
    for dir_entry in fs::read_dir(path).map_err(|e| io_error(path, e))? {
        let dir_entry = dir_entry.map_err(|e| io_error(path, e))?;
        let file_type = dir_entry.file_type().map_err(|e| io_error(path, e))?;
        let child = dir_entry.path();
        entries.push(Entry {
            name: entry_name(&child),
            path: child.to_string_lossy().into_owned(),
            is_container: file_type.is_dir(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

fn walk_aggregate(
    root: &Path,
    kind: MetricKind,
    cancel: &CancellationToken,
) -> Result<u64, StoreError> {
    let mut total: u64 = 0;

    for item in WalkDir::new(root).follow_links(false) {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        let item = match item {
            Ok(item) => item,
            Err(e) => {
                // Unreadable subtrees are skipped, as `du` does
                warn!("Skipping entry under {}: {}", root.display(), e);
                continue;
            }
        };

        if !item.file_type().is_file() {
            continue;
        }

        match kind {
            MetricKind::FileCount => total += 1,
            MetricKind::BytesUsed => match item.metadata() {
                Ok(meta) => total += meta.len(),
                Err(e) => warn!("No metadata for {}: {}", item.path().display(), e),
            },
        }
    }

    Ok(total)
}

#[async_trait]
impl BackingStore for LocalStore {
    async fn resolve(&self, path: &str) -> Result<Entry, StoreError> {
        let path = PathBuf::from(path);
        run_blocking(move || {
            let meta = fs::symlink_metadata(&path).map_err(|e| io_error(&path, e))?;
            Ok(Entry {
                name: entry_name(&path),
                path: path.to_string_lossy().into_owned(),
                is_container: meta.is_dir(),
            })
        })
        .await
    }

    async fn list_children(&self, entry: &Entry) -> Result<Vec<Entry>, StoreError> {
        if !entry.is_container {
            return Err(StoreError::NotAContainer(entry.path.clone()));
        }
        let path = PathBuf::from(&entry.path);
        debug!("Listing {}", path.display());
        run_blocking(move || list_dir(&path)).await
    }

    async fn aggregate_metric(
        &self,
        entry: &Entry,
        kind: MetricKind,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        let path = PathBuf::from(&entry.path);
        let cancel = cancel.clone();
        run_blocking(move || walk_aggregate(&path, kind, &cancel)).await
    }
}
