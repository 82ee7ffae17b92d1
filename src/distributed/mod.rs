//! Distributed Coordination
//!
//! Lets a single logical session span multiple emulation-server
//! processes: server-name assignments, globally-unique NEM (radio
//! model) identifier allocation, and tunnel keys for links whose
//! endpoints are provisioned on different servers.

mod nem;
mod tunnel;

pub use nem::NemAllocator;
pub use tunnel::TunnelKeys;

use std::collections::BTreeMap;
use thiserror::Error;

/// Errors related to cross-server coordination.
#[derive(Debug, Error)]
pub enum DistributedError {
    #[error("no server assignment for '{0}'")]
    ServerNotAssigned(String),

    #[error("NEM id space exhausted")]
    NemExhausted,

    #[error("conflicting NEM id for network {network} node {node}: have {have}, got {got}")]
    NemConflict {
        network: u32,
        node: u32,
        have: u16,
        got: u16,
    },

    #[error("tunnel key space exhausted")]
    TunnelKeyExhausted,

    #[error("tunnel key mismatch between {server1} and {server2}: {key} not allocated for this pair")]
    TunnelKeyMismatch {
        server1: String,
        server2: String,
        key: u32,
    },
}

/// Session-scoped map from emulation-server name to its control
/// endpoint. The empty name is the local/master server and is always
/// resolvable.
#[derive(Clone, Debug, Default)]
pub struct ServerMap {
    servers: BTreeMap<String, (String, u16)>,
}

impl ServerMap {
    /// Record (or replace) a server assignment.
    pub fn assign(&mut self, name: &str, host: &str, port: u16) {
        self.servers
            .insert(name.to_string(), (host.to_string(), port));
    }

    /// Resolve a server name to its endpoint. The local server (empty
    /// name) has no remote endpoint and resolves to `None`.
    pub fn resolve(&self, name: &str) -> Result<Option<(String, u16)>, DistributedError> {
        if name.is_empty() {
            return Ok(None);
        }
        self.servers
            .get(name)
            .cloned()
            .map(Some)
            .ok_or_else(|| DistributedError::ServerNotAssigned(name.to_string()))
    }

    /// True when the name is the local server or has an assignment.
    pub fn is_resolvable(&self, name: &str) -> bool {
        name.is_empty() || self.servers.contains_key(name)
    }

    /// Names with assignments, for registration broadcasts.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.servers.keys().map(String::as_str)
    }
}

/// Per-session coordinator state: server assignments plus the two
/// explicitly shared counters (NEM ids and tunnel keys).
#[derive(Debug, Default)]
pub struct Coordinator {
    pub servers: ServerMap,
    pub nems: NemAllocator,
    pub tunnels: TunnelKeys,
}

impl Coordinator {
    /// Validate that every distinct server name in use resolves,
    /// returning the offending name otherwise. Called at the
    /// Configuration→Instantiation transition, before any provisioning.
    pub fn validate_servers<'a>(
        &self,
        names: impl Iterator<Item = &'a str>,
    ) -> Result<(), DistributedError> {
        for name in names {
            if !self.servers.is_resolvable(name) {
                return Err(DistributedError::ServerNotAssigned(name.to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_server_always_resolves() {
        let map = ServerMap::default();
        assert_eq!(map.resolve("").unwrap(), None);
        assert!(map.is_resolvable(""));
    }

    #[test]
    fn test_unassigned_server_is_error() {
        let map = ServerMap::default();
        assert!(matches!(
            map.resolve("core2"),
            Err(DistributedError::ServerNotAssigned(_))
        ));
    }

    #[test]
    fn test_assignment_resolves() {
        let mut map = ServerMap::default();
        map.assign("core2", "10.0.0.2", 4038);
        assert_eq!(
            map.resolve("core2").unwrap(),
            Some(("10.0.0.2".to_string(), 4038))
        );
    }

    #[test]
    fn test_validate_servers_reports_missing() {
        let mut coord = Coordinator::default();
        coord.servers.assign("a", "10.0.0.1", 4038);
        assert!(coord.validate_servers(["", "a"].into_iter()).is_ok());
        let err = coord.validate_servers(["a", "b"].into_iter()).unwrap_err();
        assert!(matches!(err, DistributedError::ServerNotAssigned(name) if name == "b"));
    }
}
