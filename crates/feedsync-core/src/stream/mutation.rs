use super::ids::{ContentId, SessionId};
use super::operation::{OperationKind, StructuralOperation};
use super::payload::ContinuationToken;
use serde::{Deserialize, Serialize};

/// A structural diff delivered to a bound consumer as one atomic batch.
///
/// When `reset` is set the consumer drops its current children before
/// applying `structure`. `updated` lists members whose content changed
/// without a structural change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMutation {
    pub session_id: SessionId,
    #[serde(default)]
    pub reset: bool,
    #[serde(default)]
    pub structure: Vec<StructuralOperation>,
    #[serde(default)]
    pub updated: Vec<ContentId>,
    /// Token whose continuation produced this mutation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_token: Option<ContinuationToken>,
}

impl ModelMutation {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            reset: false,
            structure: Vec::new(),
            updated: Vec::new(),
            source_token: None,
        }
    }

    /// Ids added by this mutation, in order.
    pub fn appended(&self) -> impl Iterator<Item = &ContentId> {
        self.structure
            .iter()
            .filter(|op| op.kind == OperationKind::AppendOrUpdate)
            .map(|op| &op.content_id)
    }

    /// Ids removed by this mutation, in order.
    pub fn removed(&self) -> impl Iterator<Item = &ContentId> {
        self.structure
            .iter()
            .filter(|op| op.kind == OperationKind::Remove)
            .map(|op| &op.content_id)
    }

    pub fn has_structure_changes(&self) -> bool {
        self.reset || !self.structure.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_structure_changes() && self.updated.is_empty()
    }
}

/// Why a refresh was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestReason {
    OpenWithoutContent,
    OpenWithContent,
    ManualRefresh,
    HostRequested,
}

/// Describes what triggered a network response entering a mutation cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationContext {
    pub requesting_session: Option<SessionId>,
    pub continuation_token: Option<ContinuationToken>,
    pub user_initiated: bool,
}

impl MutationContext {
    pub fn refresh(requesting_session: Option<SessionId>) -> Self {
        Self {
            requesting_session,
            ..Self::default()
        }
    }

    pub fn continuation(session_id: SessionId, token: ContinuationToken) -> Self {
        Self {
            requesting_session: Some(session_id),
            continuation_token: Some(token),
            user_initiated: false,
        }
    }

    pub fn user_initiated(mut self) -> Self {
        self.user_initiated = true;
        self
    }

    pub fn is_continuation(&self) -> bool {
        self.continuation_token.is_some()
    }
}
