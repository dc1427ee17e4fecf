use super::cache::SessionCache;
use super::content_cache::ContentCache;
use super::model::{ConsumerHandle, Session};
use super::mutation::UpdateConsumer;
use super::persistence::DescriptorStore;
use super::shared_state_cache::SharedStateCache;
use crate::task_queue::TaskQueue;
use feedsync_core::clock::Clock;
use feedsync_core::config::FeedConfig;
use feedsync_core::error::{FeedError, Result};
use feedsync_core::request::RequestManager;
use feedsync_core::scheduler::{RequestBehavior, SchedulerApi, SessionState};
use feedsync_core::store::{ContentStore, SessionMutation};
use feedsync_core::stream::{
    ContentId, ContinuationToken, FeaturePayload, ModelMutation, MutationContext, RequestReason,
    SessionDescriptor, SessionId, SharedState, StreamPayload, compact_structure,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::sync::{Mutex, RwLock};

/// External collaborators the session manager drives.
#[derive(Clone)]
pub struct FeedCollaborators {
    pub store: Arc<dyn ContentStore>,
    pub request_manager: Arc<dyn RequestManager>,
    pub scheduler: Arc<dyn SchedulerApi>,
    pub clock: Arc<dyn Clock>,
}

/// What one cleanup pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub expired_sessions: Vec<SessionId>,
    pub removed_journals: usize,
    pub collected_payloads: usize,
}

/// A payload ready for rendering, with its shared state resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedContent {
    pub content_id: ContentId,
    pub payload: StreamPayload,
    /// `None` when the payload references no shared state or the state is missing.
    pub shared_state: Option<SharedState>,
}

pub(super) struct ManagerInner {
    pub(super) store: Arc<dyn ContentStore>,
    pub(super) request_manager: Arc<dyn RequestManager>,
    pub(super) scheduler: Arc<dyn SchedulerApi>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) config: FeedConfig,
    pub(super) sessions: RwLock<SessionCache>,
    pub(super) content_cache: Mutex<ContentCache>,
    pub(super) shared_states: SharedStateCache,
    pub(super) descriptors: DescriptorStore,
    pub(super) outstanding_request: AtomicBool,
    pub(super) content_creation_time_ms: AtomicI64,
}

/// Owns the live sessions and runs every structural mutation through the task queue.
///
/// `FeedSessionManager` is responsible for:
/// - Restoring the head and persisted bound sessions on startup
/// - Applying network responses to every interested session
/// - Creating, binding and invalidating bound sessions
/// - Mediating refresh and pagination requests
/// - Persisting session descriptors and purging dead sessions
///
/// Cloning is cheap; clones share the same sessions and queue.
#[derive(Clone)]
pub struct FeedSessionManager {
    inner: Arc<ManagerInner>,
    queue: TaskQueue,
}

impl FeedSessionManager {
    /// Creates a manager and spawns its task queue on the current tokio runtime.
    ///
    /// Nothing is loaded until [`initialize`](Self::initialize) runs; tasks
    /// submitted before then wait for it.
    pub fn new(collaborators: FeedCollaborators, config: FeedConfig) -> Self {
        let queue = TaskQueue::new(config.task_queue_capacity);
        let inner = ManagerInner {
            descriptors: DescriptorStore::new(collaborators.store.clone()),
            store: collaborators.store,
            request_manager: collaborators.request_manager,
            scheduler: collaborators.scheduler,
            clock: collaborators.clock,
            config,
            sessions: RwLock::new(SessionCache::new()),
            content_cache: Mutex::new(ContentCache::new()),
            shared_states: SharedStateCache::new(),
            outstanding_request: AtomicBool::new(false),
            content_creation_time_ms: AtomicI64::new(0),
        };
        Self {
            inner: Arc::new(inner),
            queue,
        }
    }

    /// Runs the initialization task: shared states, persisted sessions, journal cleanup.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue is closed. Store failures are logged and
    /// leave an empty head rather than failing.
    pub async fn initialize(&self) -> Result<()> {
        let inner = self.inner.clone();
        self.queue
            .run_initialization("initialize", async move { inner.initialize().await })
            .await?
    }

    pub fn is_initialized(&self) -> bool {
        self.queue.is_initialized()
    }

    pub fn config(&self) -> &FeedConfig {
        &self.inner.config
    }

    /// Returns the sink that applies one network result as a mutation cycle.
    pub fn update_consumer(&self, context: MutationContext) -> UpdateConsumer {
        UpdateConsumer::new(self.inner.clone(), self.queue.clone(), context)
    }

    /// Creates a bound session populated from the head and attaches `consumer`.
    ///
    /// The consumer first receives a reset mutation carrying the full structure.
    pub async fn create_session(&self, consumer: ConsumerHandle) -> Result<SessionId> {
        let inner = self.inner.clone();
        self.queue
            .run("create_session", async move { inner.create_session(consumer).await })
            .await?
    }

    /// Re-attaches a consumer to a live persisted session.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::NotFound` if the session is unknown or expired.
    pub async fn bind_session(&self, session_id: &SessionId, consumer: ConsumerHandle) -> Result<()> {
        let inner = self.inner.clone();
        let session_id = session_id.clone();
        self.queue
            .run("bind_session", async move {
                inner.bind_session(&session_id, consumer).await
            })
            .await?
    }

    /// Drops the consumer of a session but keeps the session alive.
    pub async fn detach_session(&self, session_id: &SessionId) -> Result<()> {
        let inner = self.inner.clone();
        let session_id = session_id.clone();
        self.queue
            .run("detach_session", async move {
                let mut sessions = inner.sessions.write().await;
                let session = sessions
                    .get_mut(&session_id)
                    .ok_or_else(|| FeedError::not_found("Session", session_id.to_string()))?;
                session.set_consumer(None);
                tracing::debug!(session_id = %session_id, "[FeedSessionManager] Consumer detached");
                Ok::<(), FeedError>(())
            })
            .await?
    }

    /// Removes a bound session together with its descriptor and journal.
    ///
    /// # Returns
    ///
    /// `true` if the session existed.
    pub async fn invalidate_session(&self, session_id: &SessionId) -> Result<bool> {
        let inner = self.inner.clone();
        let session_id = session_id.clone();
        self.queue
            .run("invalidate_session", async move {
                inner.invalidate_session(&session_id).await
            })
            .await?
    }

    /// Requests the page after `token` on behalf of `session_id`.
    ///
    /// # Returns
    ///
    /// `false` without issuing a request if the session is gone, expired, or
    /// no longer holds the token.
    pub async fn handle_token(&self, session_id: &SessionId, token: ContinuationToken) -> Result<bool> {
        let valid = {
            let sessions = self.inner.sessions.read().await;
            sessions.get(session_id).is_some_and(|session| {
                session
                    .descriptor()
                    .is_some_and(|descriptor| self.inner.is_alive(&descriptor))
                    && session.contains(&token.content_id)
            })
        };
        if !valid {
            tracing::debug!(
                session_id = %session_id,
                content_id = %token.content_id,
                "[FeedSessionManager] Ignoring token that no longer belongs to a live session"
            );
            return Ok(false);
        }

        let consumer =
            self.update_consumer(MutationContext::continuation(session_id.clone(), token.clone()));
        self.inner
            .request_manager
            .load_more(token, Box::new(consumer))
            .await;
        Ok(true)
    }

    /// Asks the scheduler whether to refresh and issues the request if so.
    ///
    /// Only one refresh is outstanding at a time; a second request while one
    /// is in flight returns the scheduler's behavior without issuing anything.
    pub async fn trigger_refresh(
        &self,
        session_id: Option<SessionId>,
        reason: RequestReason,
    ) -> Result<RequestBehavior> {
        let state = {
            let sessions = self.inner.sessions.read().await;
            SessionState {
                has_content: !sessions.head().is_empty(),
                content_creation_time_ms: self.inner.content_creation_time_ms.load(Ordering::SeqCst),
                has_outstanding_request: self.inner.outstanding_request.load(Ordering::SeqCst),
            }
        };

        let behavior = self.inner.scheduler.should_session_request_data(&state);
        tracing::info!(?behavior, ?reason, "[FeedSessionManager] Refresh requested");

        if !behavior.issues_request() {
            return Ok(behavior);
        }
        if self.inner.outstanding_request.swap(true, Ordering::SeqCst) {
            tracing::debug!("[FeedSessionManager] Refresh already outstanding");
            return Ok(behavior);
        }

        let consumer = self.update_consumer(MutationContext::refresh(session_id));
        self.inner
            .request_manager
            .trigger_refresh(reason, Box::new(consumer))
            .await;
        Ok(behavior)
    }

    pub async fn shared_state(&self, id: &ContentId) -> Option<SharedState> {
        self.inner.shared_states.get(id).await
    }

    pub fn is_session_alive(&self, descriptor: &SessionDescriptor) -> bool {
        self.inner.is_alive(descriptor)
    }

    /// Descriptors of the bound sessions currently held in memory.
    pub async fn persisted_sessions(&self) -> Vec<SessionDescriptor> {
        self.inner.sessions.read().await.descriptors()
    }

    /// Sorted membership of a session, or `None` if it does not exist.
    pub async fn session_content(&self, session_id: &SessionId) -> Option<Vec<ContentId>> {
        let sessions = self.inner.sessions.read().await;
        let session = if session_id.is_head() {
            Some(sessions.head())
        } else {
            sessions.get(session_id)
        }?;
        let mut content: Vec<_> = session.content().iter().cloned().collect();
        content.sort();
        Some(content)
    }

    /// Reads payloads through the content cache and resolves their shared state.
    ///
    /// Ids without a stored payload are skipped. A missing shared state is not
    /// an error: the content is returned without it.
    pub async fn get_content(&self, ids: &[ContentId]) -> Result<Vec<MaterializedContent>> {
        let mut found: HashMap<ContentId, StreamPayload> = HashMap::new();
        let mut missing = Vec::new();
        {
            let cache = self.inner.content_cache.lock().await;
            for id in ids {
                match cache.get(id) {
                    Some(payload) => {
                        found.insert(id.clone(), payload.clone());
                    }
                    None => missing.push(id.clone()),
                }
            }
        }
        if !missing.is_empty() {
            for stored in self.inner.store.get_payloads(&missing).await? {
                found.insert(stored.content_id, stored.payload);
            }
        }

        let mut materialized = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(payload) = found.remove(id) else {
                tracing::warn!(content_id = %id, "[FeedSessionManager] No payload for content");
                continue;
            };
            let shared_state = match &payload {
                StreamPayload::Feature(FeaturePayload {
                    shared_state_id: Some(state_id),
                    ..
                }) => {
                    let state = self.inner.shared_states.get(state_id).await;
                    if state.is_none() {
                        tracing::warn!(
                            content_id = %id,
                            shared_state_id = %state_id,
                            "[FeedSessionManager] Shared state missing, rendering without it"
                        );
                    }
                    state
                }
                _ => None,
            };
            materialized.push(MaterializedContent {
                content_id: id.clone(),
                payload,
                shared_state,
            });
        }
        Ok(materialized)
    }

    pub async fn write_semantic_properties(&self, properties: Vec<(ContentId, Vec<u8>)>) -> Result<()> {
        let store = self.inner.store.clone();
        self.queue
            .run("write_semantic_properties", async move {
                store.commit_semantic_properties(properties).await
            })
            .await?
    }

    pub async fn semantic_properties(&self, ids: &[ContentId]) -> Result<Vec<(ContentId, Vec<u8>)>> {
        self.inner.store.get_semantic_properties(ids).await
    }

    /// Removes journals that belong to no in-memory session.
    ///
    /// # Returns
    ///
    /// The number of journals removed.
    pub async fn cleanup_session_journals(&self) -> Result<usize> {
        let inner = self.inner.clone();
        self.queue
            .run("cleanup_session_journals", async move {
                inner.cleanup_session_journals().await
            })
            .await?
    }

    /// Writes the in-memory session set (plus the head) to the descriptor record.
    pub async fn update_stored_sessions(&self) -> Result<()> {
        let inner = self.inner.clone();
        self.queue
            .run("update_stored_sessions", async move {
                let sessions = inner.sessions.read().await;
                inner.store_descriptors(&sessions).await
            })
            .await?
    }

    /// Drops every bound session that is no longer alive.
    pub async fn purge_expired_sessions(&self) -> Result<Vec<SessionId>> {
        let inner = self.inner.clone();
        self.queue
            .run("purge_expired_sessions", async move {
                inner.purge_expired_sessions().await
            })
            .await?
    }

    /// Removes payloads no live session references.
    pub async fn trigger_content_gc(&self) -> Result<usize> {
        let inner = self.inner.clone();
        self.queue
            .run("content_gc", async move { inner.trigger_content_gc().await })
            .await?
    }

    /// Purges expired sessions, removes orphaned journals and optionally collects content.
    pub async fn cleanup(&self) -> Result<CleanupReport> {
        let inner = self.inner.clone();
        self.queue
            .run("cleanup", async move {
                let expired_sessions = inner.purge_expired_sessions().await?;
                let removed_journals = inner.cleanup_session_journals().await?;
                let collected_payloads = if inner.config.content_gc_on_cleanup {
                    inner.trigger_content_gc().await?
                } else {
                    0
                };
                let report = CleanupReport {
                    expired_sessions,
                    removed_journals,
                    collected_payloads,
                };
                tracing::info!(?report, "[FeedSessionManager] Cleanup finished");
                Ok::<_, FeedError>(report)
            })
            .await?
    }
}

impl ManagerInner {
    pub(super) fn is_alive(&self, descriptor: &SessionDescriptor) -> bool {
        descriptor.is_alive(self.clock.now_ms(), self.config.session_lifetime_ms)
    }

    async fn initialize(&self) -> Result<()> {
        tracing::info!("[FeedSessionManager] Initializing");

        match self.store.get_all_shared_states().await {
            Ok(states) => {
                let count = states.len();
                self.shared_states.replace_all(states).await;
                tracing::debug!("[FeedSessionManager] Loaded {} shared state(s)", count);
            }
            Err(e) => {
                tracing::warn!("[FeedSessionManager] Failed to load shared states: {}", e);
            }
        }

        self.initialize_persisted_sessions().await?;

        if let Err(e) = self.cleanup_session_journals().await {
            tracing::warn!("[FeedSessionManager] Journal cleanup failed: {}", e);
        }
        Ok(())
    }

    /// Rebuilds the head and every live persisted session. Expired descriptors are dropped.
    ///
    /// # Returns
    ///
    /// The number of bound sessions restored.
    async fn initialize_persisted_sessions(&self) -> Result<usize> {
        let head_journal = match self.store.get_stream_structures(&SessionId::head()).await {
            Ok(journal) => journal,
            Err(e) => {
                tracing::warn!("[FeedSessionManager] Failed to read head journal: {}", e);
                Vec::new()
            }
        };
        let descriptors = match self.descriptors.load().await {
            Ok(descriptors) => descriptors,
            Err(e) => {
                tracing::warn!("[FeedSessionManager] Failed to read session descriptors: {}", e);
                Vec::new()
            }
        };

        let mut cache = SessionCache::new();
        cache.head_mut().populate(&head_journal)?;

        let mut expired = 0usize;
        for descriptor in descriptors {
            if descriptor.session_id.is_head() {
                continue;
            }
            if !self.is_alive(&descriptor) {
                tracing::debug!(
                    session_id = %descriptor.session_id,
                    "[FeedSessionManager] Skipping expired session"
                );
                expired += 1;
                continue;
            }
            let journal = match self.store.get_stream_structures(&descriptor.session_id).await {
                Ok(journal) => journal,
                Err(e) => {
                    tracing::warn!(
                        session_id = %descriptor.session_id,
                        "[FeedSessionManager] Failed to read session journal: {}",
                        e
                    );
                    continue;
                }
            };
            let mut session = Session::bound(descriptor.session_id, descriptor.last_accessed_ms);
            session.populate(&journal)?;
            cache.insert(session);
        }

        let restored = cache.bound_count();
        let mut sessions = self.sessions.write().await;
        *sessions = cache;
        if expired > 0 {
            if let Err(e) = self.store_descriptors(&sessions).await {
                tracing::warn!("[FeedSessionManager] Failed to rewrite descriptors: {}", e);
            }
        }

        tracing::info!(
            head_size = sessions.head().len(),
            restored,
            expired,
            "[FeedSessionManager] Persisted sessions initialized"
        );
        Ok(restored)
    }

    pub(super) async fn store_descriptors(&self, sessions: &SessionCache) -> Result<()> {
        let mut descriptors = vec![SessionDescriptor::new(
            SessionId::head(),
            self.clock.now_ms(),
        )];
        descriptors.extend(sessions.descriptors());
        self.descriptors.save(descriptors).await
    }

    async fn cleanup_session_journals(&self) -> Result<usize> {
        let journals = self.store.get_all_sessions().await?;
        let orphaned: Vec<SessionId> = {
            let sessions = self.sessions.read().await;
            journals
                .into_iter()
                .filter(|id| !sessions.contains(id))
                .collect()
        };

        let mut removed = 0;
        for session_id in orphaned {
            match self.store.remove_session(&session_id).await {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(
                    session_id = %session_id,
                    "[FeedSessionManager] Failed to remove journal: {}",
                    e
                ),
            }
        }
        if removed > 0 {
            tracing::info!("[FeedSessionManager] Removed {} orphaned journal(s)", removed);
        }
        Ok(removed)
    }

    async fn create_session(&self, consumer: ConsumerHandle) -> Result<SessionId> {
        let now = self.clock.now_ms();
        let head_journal = self.store.get_stream_structures(&SessionId::head()).await?;
        let snapshot = compact_structure(&head_journal);

        let session_id = SessionId::generate();
        let mut session = Session::bound(session_id.clone(), now);
        session.populate(&snapshot)?;

        let mut journal = SessionMutation::new(session_id.clone());
        journal.clear();
        for op in &snapshot {
            journal.add(op.clone());
        }
        if let Err(e) = self.store.commit_session(journal).await {
            tracing::error!(
                session_id = %session_id,
                "[FeedSessionManager] Failed to write journal of new session: {}",
                e
            );
        }

        let mut initial = ModelMutation::new(session_id.clone());
        initial.reset = true;
        initial.structure = snapshot;
        if !consumer.send(initial) {
            tracing::debug!(session_id = %session_id, "[FeedSessionManager] Consumer gone before first mutation");
        }
        session.set_consumer(Some(consumer));

        let mut sessions = self.sessions.write().await;
        sessions.insert(session);
        if let Err(e) = self.store_descriptors(&sessions).await {
            tracing::warn!("[FeedSessionManager] Failed to persist descriptors: {}", e);
        }

        tracing::info!(
            session_id = %session_id,
            size = sessions.get(&session_id).map(Session::len).unwrap_or_default(),
            "[FeedSessionManager] Session created"
        );
        Ok(session_id)
    }

    async fn bind_session(&self, session_id: &SessionId, consumer: ConsumerHandle) -> Result<()> {
        let now = self.clock.now_ms();
        let mut sessions = self.sessions.write().await;

        let alive = sessions
            .get(session_id)
            .and_then(Session::descriptor)
            .map(|descriptor| self.is_alive(&descriptor));
        match alive {
            None => return Err(FeedError::not_found("Session", session_id.to_string())),
            Some(false) => {
                sessions.remove(session_id);
                if let Err(e) = self.store.remove_session(session_id).await {
                    tracing::warn!(session_id = %session_id, "[FeedSessionManager] Failed to remove journal: {}", e);
                }
                if let Err(e) = self.store_descriptors(&sessions).await {
                    tracing::warn!("[FeedSessionManager] Failed to persist descriptors: {}", e);
                }
                tracing::info!(session_id = %session_id, "[FeedSessionManager] Refusing to bind expired session");
                return Err(FeedError::not_found("Session", session_id.to_string()));
            }
            Some(true) => {}
        }

        let journal = self.store.get_stream_structures(session_id).await?;
        let mut initial = ModelMutation::new(session_id.clone());
        initial.reset = true;
        initial.structure = compact_structure(&journal);
        if !consumer.send(initial) {
            tracing::debug!(session_id = %session_id, "[FeedSessionManager] Consumer gone before replay");
        }

        if let Some(session) = sessions.get_mut(session_id) {
            session.touch(now);
            session.set_consumer(Some(consumer));
        }
        if let Err(e) = self.store_descriptors(&sessions).await {
            tracing::warn!("[FeedSessionManager] Failed to persist descriptors: {}", e);
        }

        tracing::info!(session_id = %session_id, "[FeedSessionManager] Session bound");
        Ok(())
    }

    async fn invalidate_session(&self, session_id: &SessionId) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        if sessions.remove(session_id).is_none() {
            return Ok(false);
        }
        if let Err(e) = self.store.remove_session(session_id).await {
            tracing::warn!(session_id = %session_id, "[FeedSessionManager] Failed to remove journal: {}", e);
        }
        self.store_descriptors(&sessions).await?;
        tracing::info!(session_id = %session_id, "[FeedSessionManager] Session invalidated");
        Ok(true)
    }

    async fn purge_expired_sessions(&self) -> Result<Vec<SessionId>> {
        let mut sessions = self.sessions.write().await;
        let expired: Vec<SessionId> = sessions
            .bound_sessions()
            .filter_map(Session::descriptor)
            .filter(|descriptor| !self.is_alive(descriptor))
            .map(|descriptor| descriptor.session_id)
            .collect();

        for session_id in &expired {
            sessions.remove(session_id);
        }
        if !expired.is_empty() {
            self.store_descriptors(&sessions).await?;
            tracing::info!("[FeedSessionManager] Purged {} expired session(s)", expired.len());
        }
        Ok(expired)
    }

    async fn trigger_content_gc(&self) -> Result<usize> {
        let keep: HashSet<ContentId> = {
            let sessions = self.sessions.read().await;
            let mut keep = sessions.head().content().clone();
            for session in sessions.bound_sessions() {
                keep.extend(session.content().iter().cloned());
            }
            keep.insert(ContentId::session_descriptors());
            keep
        };

        let collected = self.store.gc_content(&keep).await?;
        tracing::info!(
            kept = keep.len(),
            collected,
            "[FeedSessionManager] Content garbage collection finished"
        );
        Ok(collected)
    }
}

#[cfg(test)]
#[path = "manager_test.rs"]
mod tests;
