//! Application layer for feedsync.
//!
//! This crate coordinates the domain types in `feedsync-core` with a
//! [`ContentStore`](feedsync_core::store::ContentStore) implementation to keep
//! the head and bound feed sessions consistent.

pub mod session;
pub mod task_queue;

pub use session::{
    CleanupReport, ConsumerHandle, FeedCollaborators, FeedSessionManager, MaterializedContent,
    UpdateConsumer,
};
pub use task_queue::TaskQueue;
