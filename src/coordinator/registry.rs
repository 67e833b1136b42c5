//! Live validator sessions

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use super::messages::OutgoingMessage;

pub type SessionId = u64;

/// Outbound half of a connection plus the identity it signed up with
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    pub validator_id: i32,
    pub public_key: String,
    sender: UnboundedSender<OutgoingMessage>,
}

impl SessionHandle {
    pub fn new(
        id: SessionId,
        validator_id: i32,
        public_key: impl Into<String>,
        sender: UnboundedSender<OutgoingMessage>,
    ) -> Self {
        Self {
            id,
            validator_id,
            public_key: public_key.into(),
            sender,
        }
    }

    /// Queue a frame; never blocks. False once the connection's writer is gone.
    pub fn send(&self, message: OutgoingMessage) -> bool {
        self.sender.send(message).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Connected validators, keyed by session
#[derive(Debug, Default)]
pub struct ValidatorRegistry {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
    next_id: AtomicU64,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id for a new connection (before it signs up)
    pub fn next_session_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Bind a session to a validator; re-registering a session replaces its entry
    pub async fn register(&self, handle: SessionHandle) {
        debug!(session = handle.id, validator_id = handle.validator_id, "Session registered");
        self.sessions.write().await.insert(handle.id, handle);
    }

    pub async fn unregister(&self, id: SessionId) -> Option<SessionHandle> {
        let removed = self.sessions.write().await.remove(&id);
        if removed.is_some() {
            debug!(session = id, "Session unregistered");
        }
        removed
    }

    /// Point-in-time copy; safe to iterate while sessions come and go
    pub async fn active_sessions(&self) -> Vec<SessionHandle> {
        let mut sessions: Vec<SessionHandle> =
            self.sessions.read().await.values().cloned().collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }

    pub async fn session(&self, id: SessionId) -> Option<SessionHandle> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
