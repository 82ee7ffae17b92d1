//! Session Registry
//!
//! A session is one emulated network: a topology, a lifecycle state, a
//! set of session-scoped options, hook scripts, pending executions, and
//! the distributed-coordination state. The registry owns all sessions
//! and the legality rules for state transitions.

mod hooks;
mod registry;
mod state;
#[cfg(test)]
mod tests;

pub use hooks::HookScript;
pub use registry::{SessionInfo, SessionRegistry};
pub use state::{EventKind, SessionState};

use crate::distributed::{Coordinator, DistributedError};
use crate::exec::ExecDispatcher;
use crate::model::{ModelError, Topology};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Errors related to session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(u32),

    #[error("illegal transition: {from} -> {to}")]
    IllegalTransition {
        from: SessionState,
        to: SessionState,
    },

    #[error("deployment already in progress for session {0}")]
    DeploymentInProgress(u32),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Distributed(#[from] DistributedError),
}

/// A file pushed by a controller for a node, stored verbatim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    pub node: Option<u32>,
    /// Destination path on the node.
    pub name: String,
    /// Octal mode string, when supplied.
    pub mode: Option<String>,
    /// Owning service name, when the file belongs to one.
    pub service: Option<String>,
    /// Source path, for copy-style pushes.
    pub source: Option<String>,
    /// Inline contents.
    pub data: Option<String>,
}

/// One emulation session.
#[derive(Debug)]
pub struct Session {
    id: u32,
    state: SessionState,
    /// Display name, set by controllers.
    pub name: Option<String>,
    /// Topology file the session was loaded from, if any.
    pub file: Option<String>,
    /// Owning user, for session listings.
    pub user: Option<String>,
    /// The authoritative topology.
    pub topology: Topology,
    /// Session-scoped key/value options (control-net prefixes etc.).
    pub options: BTreeMap<String, String>,
    /// Hook scripts keyed by target state.
    pub hooks: Vec<HookScript>,
    /// Controller-pushed file customizations, handed to the
    /// provisioning layer at deployment.
    pub custom_files: Vec<FileEntry>,
    /// Pending command executions.
    pub exec: ExecDispatcher,
    /// Cross-server coordination state.
    pub coordinator: Coordinator,
    deploying: Arc<AtomicBool>,
}

impl Session {
    /// Create a fresh session in `Definition` state.
    pub fn new(id: u32, mac_seed: u64) -> Self {
        Self {
            id,
            state: SessionState::Definition,
            name: None,
            file: None,
            user: None,
            topology: Topology::new(mac_seed),
            options: BTreeMap::new(),
            hooks: Vec::new(),
            custom_files: Vec::new(),
            exec: ExecDispatcher::new(),
            coordinator: Coordinator::default(),
            deploying: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Session id, unique per daemon instance.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Validate a requested transition and return the states to enter,
    /// in order. The session state is not changed here; the caller
    /// enters each state via [`Session::enter_state`] after performing
    /// its entry actions.
    pub fn plan_transition(
        &self,
        target: SessionState,
    ) -> Result<Vec<SessionState>, SessionError> {
        self.state.transition_plan(target)
    }

    /// Commit entry into a state. Entering `Shutdown` clears the node
    /// and link sets once their realizations are gone; entering
    /// `Definition` additionally clears pending executions and pushed
    /// files, making the session reusable.
    pub fn enter_state(&mut self, state: SessionState) {
        debug!(session = self.id, from = %self.state, to = %state, "Session state change");
        self.state = state;
        match state {
            SessionState::Definition => {
                self.topology.clear();
                self.exec.clear();
                self.custom_files.clear();
            }
            SessionState::Shutdown => self.topology.clear(),
            _ => {}
        }
    }

    /// Acquire the per-session deployment guard. At most one
    /// topology-deployment operation may be in flight; a concurrent
    /// attempt fails immediately rather than interleaving.
    pub fn begin_deployment(&self) -> Result<DeployGuard, SessionError> {
        if self
            .deploying
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SessionError::DeploymentInProgress(self.id));
        }
        info!(session = self.id, "Deployment started");
        Ok(DeployGuard {
            flag: Arc::clone(&self.deploying),
        })
    }

    /// Set a session option.
    pub fn set_option(&mut self, key: &str, value: &str) {
        self.options.insert(key.to_string(), value.to_string());
    }

    /// Get a session option.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Distinct server names referenced by the topology, for
    /// validation before provisioning.
    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .topology
            .nodes()
            .values()
            .map(|n| n.server.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// RAII guard for the single-deployment rule; released on every exit
/// path, including errors and panics.
#[derive(Debug)]
pub struct DeployGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for DeployGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
