//! Registry of live sessions.
//!
//! Lets process shutdown reach every running session. Entries are added when
//! a session starts and removed by a guard when it finishes.

use std::sync::Arc;

use dashmap::DashMap;

use crate::session::engine::{SessionHandle, SessionId};

/// Concurrent map of running sessions.
#[derive(Debug, Default, Clone)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<SessionId, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a session until the returned guard drops.
    pub fn register(&self, handle: SessionHandle) -> RegistrationGuard {
        let id = handle.id();
        self.sessions.insert(id, handle);
        RegistrationGuard {
            id,
            sessions: Arc::clone(&self.sessions),
        }
    }

    pub fn get(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Ask every registered session to stop. Returns how many were signalled.
    pub fn stop_all(&self) -> usize {
        let handles: Vec<SessionHandle> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for handle in &handles {
            handle.stop();
        }

        if !handles.is_empty() {
            tracing::info!(sessions = handles.len(), "Stopping active sessions");
        }
        handles.len()
    }
}

/// Removes a session from its registry on drop.
#[derive(Debug)]
pub struct RegistrationGuard {
    id: SessionId,
    sessions: Arc<DashMap<SessionId, SessionHandle>>,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.sessions.remove(&self.id);
    }
}
