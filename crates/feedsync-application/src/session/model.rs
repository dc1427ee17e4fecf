//! Runtime session model.
//!
//! A `Session` replays structural operations into a membership set. The head
//! session is the canonical, unobserved view; bound sessions are ephemeral
//! views observed by one consumer.

use feedsync_core::error::{FeedError, Result};
use feedsync_core::store::{ContentStore, SessionMutation};
use feedsync_core::stream::{
    ContentId, ContinuationToken, ModelMutation, OperationKind, SessionDescriptor, SessionId,
    StructuralOperation,
};
use std::collections::HashSet;
use tokio::sync::mpsc;

/// Sending half of a bound consumer's mutation channel.
#[derive(Debug, Clone)]
pub struct ConsumerHandle {
    sender: mpsc::UnboundedSender<ModelMutation>,
}

impl ConsumerHandle {
    /// Creates a handle and the receiver the consumer drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ModelMutation>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Delivers a mutation. Returns `false` if the consumer is gone.
    pub fn send(&self, mutation: ModelMutation) -> bool {
        self.sender.send(mutation).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[derive(Debug)]
pub enum SessionKind {
    Head,
    Bound {
        consumer: Option<ConsumerHandle>,
        last_accessed_ms: i64,
    },
}

/// Result of applying one batch to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The causing token is no longer a member; nothing was applied.
    Stale,
    Applied {
        mutation: ModelMutation,
        /// Whether the journal commit succeeded (or was unnecessary).
        stored: bool,
        /// Whether the mutation reached a bound consumer.
        delivered: bool,
    },
}

impl UpdateOutcome {
    pub fn mutation(&self) -> Option<&ModelMutation> {
        match self {
            Self::Stale => None,
            Self::Applied { mutation, .. } => Some(mutation),
        }
    }
}

#[derive(Debug)]
pub struct Session {
    id: SessionId,
    kind: SessionKind,
    content: HashSet<ContentId>,
    root: Option<ContentId>,
    populated: bool,
}

impl Session {
    pub fn head() -> Self {
        Self::with_kind(SessionId::head(), SessionKind::Head)
    }

    pub fn bound(id: SessionId, last_accessed_ms: i64) -> Self {
        Self::with_kind(
            id,
            SessionKind::Bound {
                consumer: None,
                last_accessed_ms,
            },
        )
    }

    fn with_kind(id: SessionId, kind: SessionKind) -> Self {
        Self {
            id,
            kind,
            content: HashSet::new(),
            root: None,
            populated: false,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn is_head(&self) -> bool {
        matches!(self.kind, SessionKind::Head)
    }

    pub fn is_populated(&self) -> bool {
        self.populated
    }

    pub fn content(&self) -> &HashSet<ContentId> {
        &self.content
    }

    pub fn contains(&self, id: &ContentId) -> bool {
        self.content.contains(id)
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// The first parentless member.
    pub fn root(&self) -> Option<&ContentId> {
        self.root.as_ref()
    }

    pub fn last_accessed_ms(&self) -> Option<i64> {
        match &self.kind {
            SessionKind::Head => None,
            SessionKind::Bound {
                last_accessed_ms, ..
            } => Some(*last_accessed_ms),
        }
    }

    pub fn touch(&mut self, now_ms: i64) {
        if let SessionKind::Bound {
            last_accessed_ms, ..
        } = &mut self.kind
        {
            *last_accessed_ms = now_ms;
        }
    }

    /// Descriptor to persist; the head has none of its own.
    pub fn descriptor(&self) -> Option<SessionDescriptor> {
        self.last_accessed_ms()
            .map(|last_accessed_ms| SessionDescriptor::new(self.id.clone(), last_accessed_ms))
    }

    pub fn consumer(&self) -> Option<&ConsumerHandle> {
        match &self.kind {
            SessionKind::Head => None,
            SessionKind::Bound { consumer, .. } => consumer.as_ref(),
        }
    }

    /// Attaches or detaches the consumer. Ignored for the head.
    pub fn set_consumer(&mut self, handle: Option<ConsumerHandle>) {
        if let SessionKind::Bound { consumer, .. } = &mut self.kind {
            *consumer = handle;
        }
    }

    /// One-time bulk load of existing structure. Produces no diff.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::InvalidState` if the session was already populated.
    pub fn populate(&mut self, operations: &[StructuralOperation]) -> Result<()> {
        if self.populated {
            return Err(FeedError::invalid_state(format!(
                "session {} populated twice",
                self.id
            )));
        }
        for op in operations {
            self.replay(op);
        }
        self.populated = true;
        Ok(())
    }

    /// Selects the operations of a token-less incremental batch this bound
    /// session cares about.
    ///
    /// Appends are kept when they update a member, hang below a member, or are
    /// top-level (no parent, or the session root as parent). Removes are kept
    /// when they target a member. Appends accepted earlier in the same batch
    /// count as members for later operations.
    pub fn interested_operations(&self, operations: &[StructuralOperation]) -> Vec<StructuralOperation> {
        let mut accepted: HashSet<&ContentId> = HashSet::new();
        let mut selected = Vec::new();

        for op in operations {
            let is_member =
                |id: &ContentId| self.content.contains(id) || accepted.contains(id);
            let keep = match op.kind {
                OperationKind::AppendOrUpdate => {
                    is_member(&op.content_id)
                        || match &op.parent_id {
                            None => true,
                            Some(parent) => {
                                is_member(parent) || self.root.as_ref() == Some(parent)
                            }
                        }
                }
                OperationKind::Remove => is_member(&op.content_id),
                OperationKind::ClearAll | OperationKind::Unknown => false,
            };
            if keep {
                if op.kind == OperationKind::AppendOrUpdate {
                    accepted.insert(&op.content_id);
                }
                selected.push(op.clone());
            }
        }

        selected
    }

    /// Applies a batch, journals the structural diff and notifies the consumer.
    ///
    /// Bound sessions drop the whole batch when `causing_token` is no longer a
    /// member. A failed journal commit is logged and does not roll back the
    /// in-memory diff; the consumer still receives it unless
    /// `notify_on_storage_failure` is false.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::InvalidState` if called before `populate`.
    pub async fn update_session(
        &mut self,
        operations: &[StructuralOperation],
        causing_token: Option<&ContinuationToken>,
        store: &dyn ContentStore,
        notify_on_storage_failure: bool,
    ) -> Result<UpdateOutcome> {
        if !self.populated {
            return Err(FeedError::invalid_state(format!(
                "session {} updated before populate",
                self.id
            )));
        }

        if let Some(token) = causing_token {
            if !self.is_head() && !self.content.contains(&token.content_id) {
                tracing::debug!(
                    session_id = %self.id,
                    content_id = %token.content_id,
                    "[Session] Dropping batch for stale continuation token"
                );
                return Ok(UpdateOutcome::Stale);
            }
        }

        let mut mutation = ModelMutation::new(self.id.clone());
        mutation.source_token = causing_token.cloned();
        let mut journal = SessionMutation::new(self.id.clone());

        for op in operations {
            match op.kind {
                OperationKind::ClearAll => {
                    self.content.clear();
                    self.root = None;
                    mutation.reset = true;
                    mutation.structure.clear();
                    mutation.updated.clear();
                    journal.clear();
                }
                OperationKind::AppendOrUpdate => {
                    if self.insert(op) {
                        mutation.structure.push(op.clone());
                        journal.add(op.clone());
                    } else {
                        mutation.updated.push(op.content_id.clone());
                    }
                }
                OperationKind::Remove => {
                    if self.delete(&op.content_id) {
                        mutation.structure.push(op.clone());
                        journal.add(op.clone());
                    }
                }
                OperationKind::Unknown => {
                    tracing::warn!(
                        session_id = %self.id,
                        content_id = %op.content_id,
                        "[Session] Skipping operation of unknown kind"
                    );
                }
            }
        }

        let mut stored = true;
        if !journal.is_empty() {
            if let Err(e) = store.commit_session(journal).await {
                tracing::error!(
                    session_id = %self.id,
                    "[Session] Journal commit failed, keeping in-memory diff: {}",
                    e
                );
                stored = false;
            }
        }

        let mut delivered = false;
        if !mutation.is_empty() && (stored || notify_on_storage_failure) {
            if let Some(consumer) = self.consumer() {
                delivered = consumer.send(mutation.clone());
                if !delivered {
                    tracing::debug!(session_id = %self.id, "[Session] Consumer is gone");
                }
            }
        }

        tracing::debug!(
            session_id = %self.id,
            structural = mutation.structure.len(),
            updated = mutation.updated.len(),
            reset = mutation.reset,
            "[Session] Batch applied"
        );

        Ok(UpdateOutcome::Applied {
            mutation,
            stored,
            delivered,
        })
    }

    fn replay(&mut self, op: &StructuralOperation) {
        match op.kind {
            OperationKind::ClearAll => {
                self.content.clear();
                self.root = None;
            }
            OperationKind::AppendOrUpdate => {
                self.insert(op);
            }
            OperationKind::Remove => {
                self.delete(&op.content_id);
            }
            OperationKind::Unknown => {}
        }
    }

    fn insert(&mut self, op: &StructuralOperation) -> bool {
        let added = self.content.insert(op.content_id.clone());
        if added && op.parent_id.is_none() && self.root.is_none() {
            self.root = Some(op.content_id.clone());
        }
        added
    }

    fn delete(&mut self, id: &ContentId) -> bool {
        let removed = self.content.remove(id);
        if removed && self.root.as_ref() == Some(id) {
            self.root = None;
        }
        removed
    }
}

#[cfg(test)]
#[path = "model_test.rs"]
mod tests;
