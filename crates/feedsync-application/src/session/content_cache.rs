use feedsync_core::stream::{ContentId, StreamPayload};
use std::collections::HashMap;

/// Scope-bounded memo of payloads touched by one mutation cycle.
///
/// `start_mutation` empties the cache. `finish_mutation` keeps the contents,
/// so a consumer read right after a cycle is served without going back to
/// the content store. There is no eviction.
#[derive(Debug, Default)]
pub struct ContentCache {
    payloads: HashMap<ContentId, StreamPayload>,
    mutations_started: u64,
}

impl ContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_mutation(&mut self) {
        self.payloads.clear();
        self.mutations_started += 1;
    }

    pub fn finish_mutation(&mut self) {
        tracing::debug!(
            "[ContentCache] Mutation {} finished with {} payload(s) cached",
            self.mutations_started,
            self.payloads.len()
        );
    }

    pub fn put(&mut self, id: ContentId, payload: StreamPayload) {
        self.payloads.insert(id, payload);
    }

    pub fn get(&self, id: &ContentId) -> Option<&StreamPayload> {
        self.payloads.get(id)
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    pub fn reset(&mut self) {
        self.payloads.clear();
    }
}
