//! Collaborators for running the session manager without a network.

use async_trait::async_trait;
use feedsync_core::error::FeedError;
use feedsync_core::request::{RequestManager, ResponseConsumer};
use feedsync_core::scheduler::{RequestBehavior, SchedulerApi, SessionState};
use feedsync_core::stream::{ContinuationToken, RequestReason};

/// Answers every request with an I/O error.
pub struct OfflineRequestManager;

#[async_trait]
impl RequestManager for OfflineRequestManager {
    async fn load_more(&self, token: ContinuationToken, consumer: Box<dyn ResponseConsumer>) {
        tracing::debug!(content_id = %token.content_id, "[OfflineRequestManager] load_more while offline");
        consumer.accept(Err(FeedError::io("no network available"))).await;
    }

    async fn trigger_refresh(&self, reason: RequestReason, consumer: Box<dyn ResponseConsumer>) {
        tracing::debug!(?reason, "[OfflineRequestManager] refresh while offline");
        consumer.accept(Err(FeedError::io("no network available"))).await;
    }
}

/// Never asks for data; the store is maintained as-is.
pub struct OfflineScheduler;

impl SchedulerApi for OfflineScheduler {
    fn should_session_request_data(&self, state: &SessionState) -> RequestBehavior {
        if state.has_content {
            RequestBehavior::NoRequestWithContent
        } else {
            RequestBehavior::NoRequestWithWait
        }
    }

    fn on_receive_new_content(&self, _content_creation_time_ms: i64) {}

    fn on_request_error(&self, error: &FeedError) {
        tracing::warn!("[OfflineScheduler] Request failed: {}", error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedsync_core::error::Result;
    use feedsync_core::stream::FeedResponse;
    use std::sync::{Arc, Mutex};

    struct Recorder(Arc<Mutex<Vec<bool>>>);

    #[async_trait]
    impl ResponseConsumer for Recorder {
        async fn accept(&self, result: Result<FeedResponse>) {
            self.0.lock().unwrap().push(result.is_ok());
        }
    }

    #[tokio::test]
    async fn every_request_fails() {
        let results = Arc::new(Mutex::new(Vec::new()));
        let manager = OfflineRequestManager;

        manager
            .trigger_refresh(RequestReason::ManualRefresh, Box::new(Recorder(results.clone())))
            .await;
        manager
            .load_more(
                ContinuationToken {
                    content_id: "T".into(),
                    parent_id: None,
                    bytes: Vec::new(),
                },
                Box::new(Recorder(results.clone())),
            )
            .await;

        assert_eq!(*results.lock().unwrap(), vec![false, false]);
    }

    #[test]
    fn scheduler_never_requests() {
        let scheduler = OfflineScheduler;
        for has_content in [true, false] {
            let state = SessionState {
                has_content,
                ..SessionState::default()
            };
            assert!(!scheduler.should_session_request_data(&state).issues_request());
        }
    }
}
