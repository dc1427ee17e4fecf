use serde::{Deserialize, Serialize};

/// One hour.
pub const DEFAULT_SESSION_LIFETIME_MS: i64 = 60 * 60 * 1000;

pub const DEFAULT_TASK_QUEUE_CAPACITY: usize = 256;

/// Runtime configuration of the session manager.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FeedConfig {
    /// Bound sessions not accessed for this long are dead.
    pub session_lifetime_ms: i64,
    /// Bound of the task queue channel; submitters wait when it is full.
    pub task_queue_capacity: usize,
    /// Notify bound consumers even when their journal commit failed.
    pub commit_consumer_on_storage_failure: bool,
    /// Run content garbage collection as part of the cleanup pass.
    pub content_gc_on_cleanup: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            session_lifetime_ms: DEFAULT_SESSION_LIFETIME_MS,
            task_queue_capacity: DEFAULT_TASK_QUEUE_CAPACITY,
            commit_consumer_on_storage_failure: true,
            content_gc_on_cleanup: true,
        }
    }
}
