use serde::{Deserialize, Serialize};
use std::fmt;

/// Session id of the canonical head session.
pub const HEAD_SESSION_ID: &str = "$HEAD";

/// Reserved content id holding the persisted set of session descriptors.
pub const SESSION_DESCRIPTORS_CONTENT_ID: &str = "FSM";

/// Opaque identifier of one node in the feed tree.
///
/// Features, clusters, shared states and continuation tokens all share this
/// key space. Ids are stable across sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The reserved id under which session descriptors are stored.
    pub fn session_descriptors() -> Self {
        Self::new(SESSION_DESCRIPTORS_CONTENT_ID)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ContentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifier of a session, either the head or a bound session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn head() -> Self {
        Self::new(HEAD_SESSION_ID)
    }

    /// Generates a fresh id for a bound session.
    pub fn generate() -> Self {
        Self(format!("session:{}", uuid::Uuid::new_v4()))
    }

    pub fn is_head(&self) -> bool {
        self.0 == HEAD_SESSION_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_session_ids_are_unique_and_not_head() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert!(!a.is_head());
        assert!(a.as_str().starts_with("session:"));
        assert!(SessionId::head().is_head());
    }

    #[test]
    fn content_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&ContentId::from("feature:1")).unwrap();
        assert_eq!(json, "\"feature:1\"");
    }
}
