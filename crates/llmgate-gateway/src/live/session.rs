//! Session records and the registry that owns them

use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

use super::channel::StreamSender;
use crate::auth::AccessToken;
use crate::error::BridgeError;

/// Lifecycle of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Initial exchange in progress, not yet visible to publishers
    Starting,
    Active,
    /// Loop exited, registry entry about to be removed
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Starting => "starting",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// One active subscription and its credential state
pub struct Session {
    id: Uuid,
    path: String,
    sender: Arc<dyn StreamSender>,
    token: RwLock<AccessToken>,
    state: RwLock<SessionState>,
}

impl Session {
    pub fn new(path: impl Into<String>, sender: Arc<dyn StreamSender>, token: AccessToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            path: path.into(),
            sender,
            token: RwLock::new(token),
            state: RwLock::new(SessionState::Starting),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn sender(&self) -> &Arc<dyn StreamSender> {
        &self.sender
    }

    /// Copy of the current token. The lock is released before returning.
    pub fn token(&self) -> AccessToken {
        self.token.read().clone()
    }

    /// Copy of the current token value
    pub fn access_token(&self) -> String {
        self.token.read().as_str().to_string()
    }

    /// Replace the token after a refresh
    pub fn set_token(&self, token: AccessToken) {
        *self.token.write() = token;
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("state", &self.state())
            .field("token", &*self.token.read())
            .finish()
    }
}

/// Concurrent map from logical path to session
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fully built session. Fails if the path is taken.
    pub fn insert(&self, session: Arc<Session>) -> Result<(), BridgeError> {
        match self.sessions.entry(session.path().to_string()) {
            Entry::Occupied(entry) => Err(BridgeError::StreamAlreadyActive(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(session);
                Ok(())
            }
        }
    }

    pub fn get(&self, path: &str) -> Option<Arc<Session>> {
        self.sessions.get(path).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.sessions.contains_key(path)
    }

    /// Remove this exact session. A newer session on the same path is left alone.
    pub fn remove(&self, session: &Arc<Session>) -> bool {
        self.sessions
            .remove_if(session.path(), |_, current| Arc::ptr_eq(current, session))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Registered logical paths, sorted
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        paths.sort();
        paths
    }
}
