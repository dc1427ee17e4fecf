use super::ids::ContentId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kind of a structural operation.
///
/// Kinds this build does not understand deserialize to `Unknown` and are
/// skipped by every consumer of the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    AppendOrUpdate,
    Remove,
    ClearAll,
    #[serde(other)]
    Unknown,
}

/// One entry of the structural operation log.
///
/// Replay order is significant. `ClearAll` carries an empty content id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructuralOperation {
    pub kind: OperationKind,
    #[serde(default, skip_serializing_if = "ContentId::is_empty")]
    pub content_id: ContentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ContentId>,
}

impl StructuralOperation {
    pub fn append(content_id: impl Into<ContentId>, parent_id: Option<ContentId>) -> Self {
        Self {
            kind: OperationKind::AppendOrUpdate,
            content_id: content_id.into(),
            parent_id,
        }
    }

    pub fn remove(content_id: impl Into<ContentId>, parent_id: Option<ContentId>) -> Self {
        Self {
            kind: OperationKind::Remove,
            content_id: content_id.into(),
            parent_id,
        }
    }

    pub fn clear_all() -> Self {
        Self {
            kind: OperationKind::ClearAll,
            content_id: ContentId::default(),
            parent_id: None,
        }
    }

    pub fn is_clear_all(&self) -> bool {
        self.kind == OperationKind::ClearAll
    }
}

/// Replays a structural log and returns the surviving appends in first-append order.
///
/// The result is the smallest log that rebuilds the same membership: it never
/// contains `Remove`, `ClearAll` or duplicate appends.
pub fn compact_structure(operations: &[StructuralOperation]) -> Vec<StructuralOperation> {
    let mut slots: Vec<Option<StructuralOperation>> = Vec::new();
    let mut index: HashMap<ContentId, usize> = HashMap::new();

    for op in operations {
        match op.kind {
            OperationKind::ClearAll => {
                slots.clear();
                index.clear();
            }
            OperationKind::AppendOrUpdate => {
                if !index.contains_key(&op.content_id) {
                    index.insert(op.content_id.clone(), slots.len());
                    slots.push(Some(op.clone()));
                }
            }
            OperationKind::Remove => {
                if let Some(position) = index.remove(&op.content_id) {
                    slots[position] = None;
                }
            }
            OperationKind::Unknown => {}
        }
    }

    slots.into_iter().flatten().collect()
}
