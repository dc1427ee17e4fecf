//! Session application services.
//!
//! This module owns the runtime session model and the manager that drives it:
//! restoring persisted sessions, applying network responses, and keeping the
//! descriptor record and journals in step with memory.

mod cache;
mod content_cache;
mod manager;
mod model;
mod mutation;
mod persistence;
mod shared_state_cache;

pub use cache::SessionCache;
pub use content_cache::ContentCache;
pub use manager::{CleanupReport, FeedCollaborators, FeedSessionManager, MaterializedContent};
pub use model::{ConsumerHandle, Session, SessionKind, UpdateOutcome};
pub use mutation::UpdateConsumer;
pub use persistence::DescriptorStore;
pub use shared_state_cache::SharedStateCache;
