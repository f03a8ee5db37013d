//! Process-global mapping from session code to session record.

use crate::mint;
use crate::session::Session;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared handle to a live session. The mutex is the per-session exclusive
/// guard: every mutation of a session's state goes through it.
pub type SessionHandle = Arc<Mutex<Session>>;

/// Concurrent session code → session table.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: DashMap<String, SessionHandle>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Mint a fresh code and atomically insert the session built from it.
    /// Retries on collision with a live session.
    pub fn create_with<F>(&self, code_length: usize, build: F) -> (String, SessionHandle)
    where
        F: Fn(String) -> Session,
    {
        loop {
            let code = mint::session_code(code_length);
            match self.sessions.entry(code.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    let handle = Arc::new(Mutex::new(build(code.clone())));
                    slot.insert(Arc::clone(&handle));
                    return (code, handle);
                }
            }
        }
    }

    /// Look up a session by canonical (uppercase) code.
    #[must_use]
    pub fn get(&self, code: &str) -> Option<SessionHandle> {
        self.sessions.get(code).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove a session, returning its handle if it was present.
    pub fn remove(&self, code: &str) -> Option<SessionHandle> {
        self.sessions.remove(code).map(|(_, handle)| handle)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if no sessions are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot of all live session codes, for the expiry sweep.
    #[must_use]
    pub fn codes(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }
}
