use super::open_store;
use anyhow::{Context, Result};
use feedsync_application::session::DescriptorStore;
use feedsync_core::clock::{Clock, SystemClock};
use feedsync_core::config::FeedConfig;
use feedsync_core::store::ContentStore;
use feedsync_core::stream::SessionId;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRow {
    pub session_id: SessionId,
    pub last_accessed_ms: i64,
    pub alive: bool,
    pub journal_len: usize,
}

pub async fn run(store_dir: &Path, config: &FeedConfig) -> Result<()> {
    let store = Arc::new(open_store(store_dir)?);
    let rows = list_sessions(store, config, &SystemClock).await?;

    if rows.is_empty() {
        println!("No persisted sessions in {}", store_dir.display());
        return Ok(());
    }
    for row in rows {
        println!(
            "{}\t{}\t{}\t{} op(s)",
            row.session_id,
            row.last_accessed_ms,
            if row.alive { "alive" } else { "expired" },
            row.journal_len
        );
    }
    Ok(())
}

/// Reads the descriptor record and classifies each session. The head never expires.
pub async fn list_sessions(
    store: Arc<dyn ContentStore>,
    config: &FeedConfig,
    clock: &dyn Clock,
) -> Result<Vec<SessionRow>> {
    let descriptors = DescriptorStore::new(store.clone())
        .load()
        .await
        .context("Failed to read session descriptors")?;
    let now = clock.now_ms();

    let mut rows = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        let journal = store.get_stream_structures(&descriptor.session_id).await?;
        rows.push(SessionRow {
            alive: descriptor.session_id.is_head()
                || descriptor.is_alive(now, config.session_lifetime_ms),
            session_id: descriptor.session_id,
            last_accessed_ms: descriptor.last_accessed_ms,
            journal_len: journal.len(),
        });
    }
    Ok(rows)
}
