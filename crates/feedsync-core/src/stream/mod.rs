//! Stream domain module.
//!
//! This module contains the data model shared by every layer of feedsync:
//! identifiers, structural operations, payloads, continuation tokens,
//! persisted session descriptors, and the mutations delivered to bound
//! consumers.
//!
//! # Module Structure
//!
//! - `ids`: `ContentId` and `SessionId`
//! - `operation`: `StructuralOperation`, `OperationKind`, journal compaction
//! - `payload`: payloads, shared state, continuation tokens, network responses
//! - `descriptor`: `SessionDescriptor` and its persisted record
//! - `mutation`: `ModelMutation` and `MutationContext`
//!
//! # Usage
//!
//! ```ignore
//! use feedsync_core::stream::{ContentId, SessionId, StructuralOperation};
//! use feedsync_core::stream::{FeedResponse, DataOperation, StreamPayload};
//! ```

mod descriptor;
mod ids;
mod mutation;
mod operation;
mod payload;

// Re-export public API
pub use descriptor::{SessionDescriptor, SessionDescriptorRecord};
pub use ids::{ContentId, HEAD_SESSION_ID, SESSION_DESCRIPTORS_CONTENT_ID, SessionId};
pub use mutation::{ModelMutation, MutationContext, RequestReason};
pub use operation::{OperationKind, StructuralOperation, compact_structure};
pub use payload::{
    ContinuationToken, DataOperation, FeaturePayload, FeedResponse, PayloadWithId, SharedState,
    StreamPayload,
};
