//! Persistence of session descriptors.
//!
//! All descriptors live in one record stored under the reserved
//! `SESSION_DESCRIPTORS_CONTENT_ID` in the content store.

use feedsync_core::error::{FeedError, Result};
use feedsync_core::store::{ContentMutation, ContentStore};
use feedsync_core::stream::{ContentId, SessionDescriptor, SessionDescriptorRecord, StreamPayload};
use std::sync::Arc;

pub struct DescriptorStore {
    store: Arc<dyn ContentStore>,
}

impl DescriptorStore {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }

    /// Reads the persisted descriptor set. A missing record is an empty set.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails or the record does not decode.
    pub async fn load(&self) -> Result<Vec<SessionDescriptor>> {
        let id = ContentId::session_descriptors();
        let payloads = self.store.get_payloads(std::slice::from_ref(&id)).await?;

        let Some(stored) = payloads.into_iter().find(|p| p.content_id == id) else {
            tracing::debug!("[DescriptorStore] No persisted session descriptors");
            return Ok(Vec::new());
        };

        match stored.payload {
            StreamPayload::Record { bytes } => {
                let record = SessionDescriptorRecord::from_bytes(&bytes)?;
                Ok(record.sessions)
            }
            other => Err(FeedError::data_access(format!(
                "unexpected payload under {}: {:?}",
                id, other
            ))),
        }
    }

    /// Replaces the persisted descriptor set.
    pub async fn save(&self, descriptors: Vec<SessionDescriptor>) -> Result<()> {
        let count = descriptors.len();
        let bytes = SessionDescriptorRecord::new(descriptors).to_bytes()?;

        let mut mutation = ContentMutation::new();
        mutation.add(ContentId::session_descriptors(), StreamPayload::Record { bytes });
        self.store.commit_content(mutation).await?;

        tracing::debug!("[DescriptorStore] Saved {} session descriptor(s)", count);
        Ok(())
    }
}
