pub mod cleanup;
pub mod journal;
pub mod offline;
pub mod sessions;

use anyhow::{Context, Result};
use feedsync_infrastructure::FileContentStore;
use std::path::Path;

/// Opens the file store, taking its directory lock.
pub fn open_store(store_dir: &Path) -> Result<FileContentStore> {
    FileContentStore::open(store_dir)
        .with_context(|| format!("Failed to open store at {}", store_dir.display()))
}
