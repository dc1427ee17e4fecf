//! Network collaborator traits.

use crate::error::Result;
use crate::stream::{ContinuationToken, FeedResponse, RequestReason};
use async_trait::async_trait;

/// Sink for the result of one network request.
///
/// The session manager hands one of these to the request manager; invoking
/// it runs one mutation cycle.
#[async_trait]
pub trait ResponseConsumer: Send + Sync {
    async fn accept(&self, result: Result<FeedResponse>);
}

/// Issues feed requests on behalf of the session manager.
///
/// Both calls must eventually invoke `consumer` exactly once. Retry and
/// timeout policy belong to the implementation.
#[async_trait]
pub trait RequestManager: Send + Sync {
    /// Loads the page following `token`.
    async fn load_more(&self, token: ContinuationToken, consumer: Box<dyn ResponseConsumer>);

    /// Requests a fresh head of the feed.
    async fn trigger_refresh(&self, reason: RequestReason, consumer: Box<dyn ResponseConsumer>);
}
