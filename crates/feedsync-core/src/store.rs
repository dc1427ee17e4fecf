//! Content store trait.
//!
//! Defines the interface for durable payload, shared-state and journal storage.

use crate::error::Result;
use crate::stream::{ContentId, PayloadWithId, SessionId, SharedState, StreamPayload, StructuralOperation};
use async_trait::async_trait;
use std::collections::HashSet;

/// A pending append to one session's structural journal.
///
/// When `clears_journal` is set the store truncates the journal before
/// appending `operations`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMutation {
    session_id: SessionId,
    clears_journal: bool,
    operations: Vec<StructuralOperation>,
}

impl SessionMutation {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            clears_journal: false,
            operations: Vec::new(),
        }
    }

    pub fn add(&mut self, operation: StructuralOperation) -> &mut Self {
        self.operations.push(operation);
        self
    }

    /// Discards everything added so far and truncates the stored journal on commit.
    pub fn clear(&mut self) -> &mut Self {
        self.clears_journal = true;
        self.operations.clear();
        self
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn clears_journal(&self) -> bool {
        self.clears_journal
    }

    pub fn operations(&self) -> &[StructuralOperation] {
        &self.operations
    }

    pub fn is_empty(&self) -> bool {
        !self.clears_journal && self.operations.is_empty()
    }
}

/// A batch of payload and shared-state writes committed together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentMutation {
    payloads: Vec<PayloadWithId>,
    shared_states: Vec<(ContentId, SharedState)>,
}

impl ContentMutation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, content_id: ContentId, payload: StreamPayload) -> &mut Self {
        self.payloads.push(PayloadWithId {
            content_id,
            payload,
        });
        self
    }

    pub fn add_shared_state(&mut self, content_id: ContentId, state: SharedState) -> &mut Self {
        self.shared_states.push((content_id, state));
        self
    }

    pub fn payloads(&self) -> &[PayloadWithId] {
        &self.payloads
    }

    pub fn shared_states(&self) -> &[(ContentId, SharedState)] {
        &self.shared_states
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty() && self.shared_states.is_empty()
    }

    pub fn into_parts(self) -> (Vec<PayloadWithId>, Vec<(ContentId, SharedState)>) {
        (self.payloads, self.shared_states)
    }
}

/// An abstract durable store for feed content.
///
/// Implementations are assumed crash-consistent per commit. All session
/// mutation happens through the single-writer task queue, so implementations
/// only need to be safe for concurrent reads alongside one writer.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Returns the payloads stored under `ids`.
    ///
    /// Ids without a stored payload are omitted from the result.
    async fn get_payloads(&self, ids: &[ContentId]) -> Result<Vec<PayloadWithId>>;

    /// Returns every stored shared state.
    async fn get_all_shared_states(&self) -> Result<Vec<(ContentId, SharedState)>>;

    /// Returns the structural journal of a session, in commit order.
    ///
    /// Unknown sessions yield an empty journal.
    async fn get_stream_structures(&self, session_id: &SessionId) -> Result<Vec<StructuralOperation>>;

    /// Lists the ids of every session that has a stored journal.
    async fn get_all_sessions(&self) -> Result<Vec<SessionId>>;

    /// Appends to a session journal.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Journal committed
    /// - `Err(_)`: Commit failed; nothing is guaranteed to be stored
    async fn commit_session(&self, mutation: SessionMutation) -> Result<()>;

    /// Writes payloads and shared states.
    ///
    /// Shared states are write-once: an id that already has a shared state keeps it.
    async fn commit_content(&self, mutation: ContentMutation) -> Result<()>;

    /// Returns semantic properties stored for `ids`, omitting ids without any.
    async fn get_semantic_properties(&self, ids: &[ContentId]) -> Result<Vec<(ContentId, Vec<u8>)>>;

    /// Writes semantic properties, replacing existing values.
    async fn commit_semantic_properties(&self, properties: Vec<(ContentId, Vec<u8>)>) -> Result<()>;

    /// Removes a session journal. Removing an unknown session is not an error.
    async fn remove_session(&self, session_id: &SessionId) -> Result<()>;

    /// Removes every payload whose id is not in `keep`.
    ///
    /// Shared states and the reserved session descriptor record are never
    /// collected.
    ///
    /// # Returns
    ///
    /// The number of payloads removed.
    async fn gc_content(&self, keep: &HashSet<ContentId>) -> Result<usize>;
}
