//! In-memory [`ContentStore`] for tests and ephemeral feeds.

use async_trait::async_trait;
use feedsync_core::error::{FeedError, Result};
use feedsync_core::store::{ContentMutation, ContentStore, SessionMutation};
use feedsync_core::stream::{
    ContentId, PayloadWithId, SessionId, SharedState, StreamPayload, StructuralOperation,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct StoreState {
    payloads: HashMap<ContentId, StreamPayload>,
    shared_states: HashMap<ContentId, SharedState>,
    journals: HashMap<SessionId, Vec<StructuralOperation>>,
    semantic_properties: HashMap<ContentId, Vec<u8>>,
}

/// Content store that keeps everything in process memory.
///
/// Commits can be made to fail on demand to exercise storage-failure paths.
#[derive(Default)]
pub struct InMemoryContentStore {
    state: RwLock<StoreState>,
    fail_session_commits: AtomicBool,
    fail_content_commits: AtomicBool,
    payload_reads: AtomicUsize,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following `commit_session` fail until reset.
    pub fn set_fail_session_commits(&self, fail: bool) {
        self.fail_session_commits.store(fail, Ordering::SeqCst);
    }

    /// Makes every following `commit_content` fail until reset.
    pub fn set_fail_content_commits(&self, fail: bool) {
        self.fail_content_commits.store(fail, Ordering::SeqCst);
    }

    /// Number of `get_payloads` calls served so far.
    pub fn payload_reads(&self) -> usize {
        self.payload_reads.load(Ordering::SeqCst)
    }

    pub async fn payload_count(&self) -> usize {
        self.state.read().await.payloads.len()
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn get_payloads(&self, ids: &[ContentId]) -> Result<Vec<PayloadWithId>> {
        self.payload_reads.fetch_add(1, Ordering::SeqCst);
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| {
                state.payloads.get(id).map(|payload| PayloadWithId {
                    content_id: id.clone(),
                    payload: payload.clone(),
                })
            })
            .collect())
    }

    async fn get_all_shared_states(&self) -> Result<Vec<(ContentId, SharedState)>> {
        let state = self.state.read().await;
        let mut states: Vec<_> = state
            .shared_states
            .iter()
            .map(|(id, shared)| (id.clone(), shared.clone()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(states)
    }

    async fn get_stream_structures(&self, session_id: &SessionId) -> Result<Vec<StructuralOperation>> {
        let state = self.state.read().await;
        Ok(state.journals.get(session_id).cloned().unwrap_or_default())
    }

    async fn get_all_sessions(&self) -> Result<Vec<SessionId>> {
        let state = self.state.read().await;
        let mut sessions: Vec<_> = state.journals.keys().cloned().collect();
        sessions.sort();
        Ok(sessions)
    }

    async fn commit_session(&self, mutation: SessionMutation) -> Result<()> {
        if self.fail_session_commits.load(Ordering::SeqCst) {
            return Err(FeedError::io(format!(
                "journal commit for {} rejected",
                mutation.session_id()
            )));
        }

        let mut state = self.state.write().await;
        let journal = state
            .journals
            .entry(mutation.session_id().clone())
            .or_default();
        if mutation.clears_journal() {
            journal.clear();
        }
        journal.extend(mutation.operations().iter().cloned());
        Ok(())
    }

    async fn commit_content(&self, mutation: ContentMutation) -> Result<()> {
        if self.fail_content_commits.load(Ordering::SeqCst) {
            return Err(FeedError::io("content commit rejected"));
        }

        let (payloads, shared_states) = mutation.into_parts();
        let mut state = self.state.write().await;
        for PayloadWithId { content_id, payload } in payloads {
            state.payloads.insert(content_id, payload);
        }
        for (id, shared) in shared_states {
            state.shared_states.entry(id).or_insert(shared);
        }
        Ok(())
    }

    async fn get_semantic_properties(&self, ids: &[ContentId]) -> Result<Vec<(ContentId, Vec<u8>)>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| {
                state
                    .semantic_properties
                    .get(id)
                    .map(|bytes| (id.clone(), bytes.clone()))
            })
            .collect())
    }

    async fn commit_semantic_properties(&self, properties: Vec<(ContentId, Vec<u8>)>) -> Result<()> {
        let mut state = self.state.write().await;
        state.semantic_properties.extend(properties);
        Ok(())
    }

    async fn remove_session(&self, session_id: &SessionId) -> Result<()> {
        self.state.write().await.journals.remove(session_id);
        Ok(())
    }

    async fn gc_content(&self, keep: &HashSet<ContentId>) -> Result<usize> {
        let descriptors = ContentId::session_descriptors();
        let mut state = self.state.write().await;
        let before = state.payloads.len();
        state
            .payloads
            .retain(|id, _| keep.contains(id) || *id == descriptors);
        Ok(before - state.payloads.len())
    }
}
