//! Scheduler collaborator trait.

use crate::error::FeedError;
use serde::{Deserialize, Serialize};

/// What the scheduler wants done when a session asks for data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestBehavior {
    Unknown,
    RequestWithWait,
    RequestWithContent,
    RequestWithTimeout,
    NoRequestWithWait,
    NoRequestWithContent,
    NoRequestWithTimeout,
}

impl RequestBehavior {
    /// Whether this behavior issues a network refresh.
    pub fn issues_request(self) -> bool {
        matches!(
            self,
            Self::RequestWithWait | Self::RequestWithContent | Self::RequestWithTimeout
        )
    }
}

/// Snapshot of the feed state the scheduler decides on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionState {
    pub has_content: bool,
    /// When the head last received structural content, in epoch millis. Zero if never.
    pub content_creation_time_ms: i64,
    pub has_outstanding_request: bool,
}

/// Decides whether and how refreshes are issued.
pub trait SchedulerApi: Send + Sync {
    fn should_session_request_data(&self, state: &SessionState) -> RequestBehavior;

    fn on_receive_new_content(&self, content_creation_time_ms: i64);

    fn on_request_error(&self, error: &FeedError);
}
