use feedsync_core::stream::{ContentId, SharedState};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory copy of every shared state in the content store.
///
/// Entries are write-once: inserting an id that is already present keeps the
/// original. The cache is only ever replaced wholesale.
#[derive(Clone, Default)]
pub struct SharedStateCache {
    states: Arc<RwLock<HashMap<ContentId, SharedState>>>,
}

impl SharedStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &ContentId) -> Option<SharedState> {
        let states = self.states.read().await;
        states.get(id).cloned()
    }

    /// Inserts a shared state unless the id already has one.
    ///
    /// # Returns
    ///
    /// `true` if the state was new.
    pub async fn insert(&self, id: ContentId, state: SharedState) -> bool {
        let mut states = self.states.write().await;
        if let Some(existing) = states.get(&id) {
            if existing != &state {
                tracing::warn!(
                    content_id = %id,
                    "[SharedStateCache] Ignoring rewrite of immutable shared state"
                );
            }
            return false;
        }
        states.insert(id, state);
        true
    }

    pub async fn replace_all(&self, entries: Vec<(ContentId, SharedState)>) {
        let mut states = self.states.write().await;
        *states = entries.into_iter().collect();
    }

    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }
}
