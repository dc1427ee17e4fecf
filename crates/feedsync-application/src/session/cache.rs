use super::model::Session;
use feedsync_core::stream::{SessionDescriptor, SessionId};
use std::collections::HashMap;

/// The live session set: the head plus every bound session.
///
/// Not synchronized on its own; the manager keeps it behind a lock that is
/// only written from the task queue.
pub struct SessionCache {
    head: Session,
    sessions: HashMap<SessionId, Session>,
}

impl SessionCache {
    /// Creates a cache holding an unpopulated head and no bound sessions.
    pub fn new() -> Self {
        Self {
            head: Session::head(),
            sessions: HashMap::new(),
        }
    }

    pub fn head(&self) -> &Session {
        &self.head
    }

    pub fn head_mut(&mut self) -> &mut Session {
        &mut self.head
    }

    /// Gets a bound session by id.
    pub fn get(&self, session_id: &SessionId) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    pub fn get_mut(&mut self, session_id: &SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(session_id)
    }

    /// Inserts a bound session, replacing any session with the same id.
    pub fn insert(&mut self, session: Session) {
        self.sessions.insert(session.id().clone(), session);
    }

    pub fn remove(&mut self, session_id: &SessionId) -> Option<Session> {
        self.sessions.remove(session_id)
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        session_id.is_head() || self.sessions.contains_key(session_id)
    }

    pub fn bound_sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn bound_sessions_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.values_mut()
    }

    pub fn bound_count(&self) -> usize {
        self.sessions.len()
    }

    /// Descriptors of every bound session, ordered by id.
    pub fn descriptors(&self) -> Vec<SessionDescriptor> {
        let mut descriptors: Vec<_> = self
            .sessions
            .values()
            .filter_map(Session::descriptor)
            .collect();
        descriptors.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        descriptors
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new()
    }
}
