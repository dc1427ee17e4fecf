use super::ids::SessionId;
use serde::{Deserialize, Serialize};

/// Durable record identifying a bound session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub session_id: SessionId,
    /// Milliseconds since the Unix epoch.
    pub last_accessed_ms: i64,
}

impl SessionDescriptor {
    pub fn new(session_id: SessionId, last_accessed_ms: i64) -> Self {
        Self {
            session_id,
            last_accessed_ms,
        }
    }

    /// A session is alive while `now - last_accessed < lifetime`.
    pub fn is_alive(&self, now_ms: i64, lifetime_ms: i64) -> bool {
        now_ms.saturating_sub(self.last_accessed_ms) < lifetime_ms
    }
}

/// The persisted set of descriptors, stored under the reserved content id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptorRecord {
    #[serde(default)]
    pub sessions: Vec<SessionDescriptor>,
}

impl SessionDescriptorRecord {
    pub fn new(sessions: Vec<SessionDescriptor>) -> Self {
        Self { sessions }
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}
