use super::offline::{OfflineRequestManager, OfflineScheduler};
use super::open_store;
use anyhow::{Context, Result};
use feedsync_application::{FeedCollaborators, FeedSessionManager};
use feedsync_core::clock::{Clock, SystemClock};
use feedsync_core::config::FeedConfig;
use feedsync_core::store::ContentStore;
use std::path::Path;
use std::sync::Arc;

/// Totals of one maintenance run, counted against the store before initialization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceSummary {
    pub live_sessions: usize,
    pub removed_journals: usize,
    pub collected_payloads: usize,
}

pub async fn run(store_dir: &Path, config: FeedConfig) -> Result<()> {
    let store = Arc::new(open_store(store_dir)?);
    let summary = cleanup_store(store, config, Arc::new(SystemClock)).await?;

    println!("live sessions:      {}", summary.live_sessions);
    println!("removed journals:   {}", summary.removed_journals);
    println!("collected payloads: {}", summary.collected_payloads);
    Ok(())
}

/// Initializes a manager over `store` (which drops dead sessions) and runs a cleanup pass.
pub async fn cleanup_store(
    store: Arc<dyn ContentStore>,
    config: FeedConfig,
    clock: Arc<dyn Clock>,
) -> Result<MaintenanceSummary> {
    let journals_before = store.get_all_sessions().await?.len();

    let manager = FeedSessionManager::new(
        FeedCollaborators {
            store: store.clone(),
            request_manager: Arc::new(OfflineRequestManager),
            scheduler: Arc::new(OfflineScheduler),
            clock,
        },
        config,
    );
    manager
        .initialize()
        .await
        .context("Failed to initialize session manager")?;
    let report = manager.cleanup().await.context("Cleanup failed")?;

    let journals_after = store.get_all_sessions().await?.len();
    Ok(MaintenanceSummary {
        live_sessions: manager.persisted_sessions().await.len(),
        removed_journals: journals_before.saturating_sub(journals_after),
        collected_payloads: report.collected_payloads,
    })
}
