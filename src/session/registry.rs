//! The set of known sessions.

use super::{Session, SessionError, SessionState};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Summary of one session, for Session-message listings.
#[derive(Clone, Debug)]
pub struct SessionInfo {
    pub id: u32,
    pub name: Option<String>,
    pub file: Option<String>,
    pub state: SessionState,
    pub node_count: usize,
}

/// Owns every session. Each session sits behind its own async mutex:
/// the per-session single-writer discipline — channel workers for
/// different sessions never contend.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<u32, Arc<Mutex<Session>>>,
    next_id: u32,
    mac_seed: u64,
}

impl SessionRegistry {
    /// Create a registry whose sessions seed their MAC allocators from
    /// the given prefix.
    pub fn new(mac_seed: u64) -> Self {
        Self {
            sessions: BTreeMap::new(),
            next_id: 1,
            mac_seed,
        }
    }

    /// Create a new session and return its id and handle.
    pub fn create(&mut self) -> (u32, Arc<Mutex<Session>>) {
        let id = self.next_id;
        self.next_id += 1;
        let session = Arc::new(Mutex::new(Session::new(id, self.mac_seed)));
        self.sessions.insert(id, Arc::clone(&session));
        info!(session = id, "Session created");
        (id, session)
    }

    /// Look up a session by id.
    pub fn get(&self, id: u32) -> Result<Arc<Mutex<Session>>, SessionError> {
        self.sessions
            .get(&id)
            .cloned()
            .ok_or(SessionError::NotFound(id))
    }

    /// Remove a session after shutdown completes.
    pub fn destroy(&mut self, id: u32) -> Result<(), SessionError> {
        self.sessions
            .remove(&id)
            .map(|_| info!(session = id, "Session destroyed"))
            .ok_or(SessionError::NotFound(id))
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True when no sessions exist.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Summaries of every session, for Session-message listings.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let mut infos = Vec::with_capacity(self.sessions.len());
        for session in self.sessions.values() {
            let session = session.lock().await;
            infos.push(SessionInfo {
                id: session.id(),
                name: session.name.clone(),
                file: session.file.clone(),
                state: session.state(),
                node_count: session.topology.node_count(),
            });
        }
        infos
    }
}
