//! Payloads and network responses.

use super::ids::ContentId;
use super::operation::{OperationKind, StructuralOperation};
use serde::{Deserialize, Serialize};

/// Content bytes of a feature, optionally styled by a shared state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturePayload {
    pub bytes: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_state_id: Option<ContentId>,
}

/// Immutable, globally deduplicated payload reused across features.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedState {
    pub bytes: Vec<u8>,
}

/// Payload stored under a content id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamPayload {
    /// Renderable feature or cluster content.
    Feature(FeaturePayload),
    /// Opaque pagination cursor bytes.
    Token { bytes: Vec<u8> },
    /// Bookkeeping record (e.g. the session descriptor set).
    Record { bytes: Vec<u8> },
}

impl StreamPayload {
    pub fn feature(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Feature(FeaturePayload {
            bytes: bytes.into(),
            shared_state_id: None,
        })
    }

    pub fn styled_feature(bytes: impl Into<Vec<u8>>, shared_state_id: impl Into<ContentId>) -> Self {
        Self::Feature(FeaturePayload {
            bytes: bytes.into(),
            shared_state_id: Some(shared_state_id.into()),
        })
    }
}

/// A payload together with the id it is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadWithId {
    pub content_id: ContentId,
    pub payload: StreamPayload,
}

/// A pagination cursor tied to a specific content id.
///
/// The cursor is only valid while its content id is a member of the session
/// that holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationToken {
    pub content_id: ContentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ContentId>,
    pub bytes: Vec<u8>,
}

/// A structural operation plus the payload it introduces, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataOperation {
    pub structure: StructuralOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<StreamPayload>,
}

impl DataOperation {
    pub fn new(structure: StructuralOperation, payload: Option<StreamPayload>) -> Self {
        Self { structure, payload }
    }

    /// Returns the continuation token this operation appends, if it is one.
    pub fn continuation_token(&self) -> Option<ContinuationToken> {
        match (&self.structure.kind, &self.payload) {
            (OperationKind::AppendOrUpdate, Some(StreamPayload::Token { bytes })) => {
                Some(ContinuationToken {
                    content_id: self.structure.content_id.clone(),
                    parent_id: self.structure.parent_id.clone(),
                    bytes: bytes.clone(),
                })
            }
            _ => None,
        }
    }
}

/// One network response: shared states plus an ordered batch of data operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedResponse {
    #[serde(default)]
    pub shared_states: Vec<(ContentId, SharedState)>,
    #[serde(default)]
    pub operations: Vec<DataOperation>,
}

impl FeedResponse {
    pub fn new(operations: Vec<DataOperation>) -> Self {
        Self {
            shared_states: Vec::new(),
            operations,
        }
    }

    pub fn with_shared_state(mut self, id: impl Into<ContentId>, state: SharedState) -> Self {
        self.shared_states.push((id.into(), state));
        self
    }

    pub fn has_clear_all(&self) -> bool {
        self.operations.iter().any(|op| op.structure.is_clear_all())
    }

    /// Continuation tokens appended by this response.
    pub fn continuation_tokens(&self) -> Vec<ContinuationToken> {
        self.operations
            .iter()
            .filter_map(DataOperation::continuation_token)
            .collect()
    }
}
