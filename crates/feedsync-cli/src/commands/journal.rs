use super::open_store;
use anyhow::{Context, Result};
use feedsync_core::store::ContentStore;
use feedsync_core::stream::{SessionId, StructuralOperation, compact_structure};
use std::path::Path;

pub async fn run(store_dir: &Path, session: &str, compact: bool) -> Result<()> {
    let store = open_store(store_dir)?;
    let operations = read_journal(&store, &SessionId::new(session), compact).await?;

    for op in &operations {
        println!("{}", serde_json::to_string(op)?);
    }
    tracing::info!(session_id = session, count = operations.len(), "[journal] Printed journal");
    Ok(())
}

pub async fn read_journal(
    store: &dyn ContentStore,
    session_id: &SessionId,
    compact: bool,
) -> Result<Vec<StructuralOperation>> {
    let journal = store
        .get_stream_structures(session_id)
        .await
        .with_context(|| format!("Failed to read journal of {}", session_id))?;
    Ok(if compact {
        compact_structure(&journal)
    } else {
        journal
    })
}
