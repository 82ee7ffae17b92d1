//! Tunnel key allocation.
//!
//! A link whose endpoints live on different emulation servers is
//! realized as a tunnel rather than a local bridge attachment. The key
//! identifies one of potentially many tunnels between the same pair of
//! servers; both ends must agree on it before the tunnel is usable.

use super::DistributedError;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Canonical unordered server pair (lexicographically smaller first).
type ServerPair = (String, String);

fn pair(a: &str, b: &str) -> ServerPair {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Session-scoped tunnel key registry.
#[derive(Debug)]
pub struct TunnelKeys {
    next: u32,
    by_pair: BTreeMap<ServerPair, BTreeSet<u32>>,
}

impl Default for TunnelKeys {
    fn default() -> Self {
        Self {
            next: 1,
            by_pair: BTreeMap::new(),
        }
    }
}

impl TunnelKeys {
    /// Allocate a key for a new tunnel between two servers. The key is
    /// unique among all tunnels between this pair (the global counter
    /// makes it unique session-wide, which keeps re-assignments after
    /// deletes unambiguous).
    pub fn allocate(&mut self, server_a: &str, server_b: &str) -> Result<u32, DistributedError> {
        if self.next == u32::MAX {
            return Err(DistributedError::TunnelKeyExhausted);
        }
        let key = self.next;
        self.next += 1;
        let pair = pair(server_a, server_b);
        self.by_pair.entry(pair.clone()).or_default().insert(key);
        debug!(server_a, server_b, key, "Allocated tunnel key");
        Ok(key)
    }

    /// Verify that a peer-supplied key was allocated for this server
    /// pair. Mismatched keys are a configuration error, never silently
    /// tolerated.
    pub fn confirm(
        &self,
        server_a: &str,
        server_b: &str,
        key: u32,
    ) -> Result<(), DistributedError> {
        let pair = pair(server_a, server_b);
        let known = self
            .by_pair
            .get(&pair)
            .map(|keys| keys.contains(&key))
            .unwrap_or(false);
        if known {
            Ok(())
        } else {
            Err(DistributedError::TunnelKeyMismatch {
                server1: pair.0,
                server2: pair.1,
                key,
            })
        }
    }

    /// Release a key when its tunnel is torn down.
    pub fn release(&mut self, server_a: &str, server_b: &str, key: u32) {
        if let Some(keys) = self.by_pair.get_mut(&pair(server_a, server_b)) {
            keys.remove(&key);
        }
    }

    /// Keys currently allocated between a server pair.
    pub fn keys_for(&self, server_a: &str, server_b: &str) -> Vec<u32> {
        self.by_pair
            .get(&pair(server_a, server_b))
            .map(|keys| keys.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_distinct_per_pair() {
        let mut keys = TunnelKeys::default();
        let k1 = keys.allocate("a", "b").unwrap();
        let k2 = keys.allocate("a", "b").unwrap();
        assert_ne!(k1, k2);
        assert_eq!(keys.keys_for("a", "b").len(), 2);
    }

    #[test]
    fn test_pair_is_unordered() {
        let mut keys = TunnelKeys::default();
        let k = keys.allocate("b", "a").unwrap();
        // Confirmation works regardless of endpoint order.
        keys.confirm("a", "b", k).unwrap();
        keys.confirm("b", "a", k).unwrap();
    }

    #[test]
    fn test_mismatched_key_rejected() {
        let mut keys = TunnelKeys::default();
        let k = keys.allocate("a", "b").unwrap();
        assert!(matches!(
            keys.confirm("a", "b", k + 100),
            Err(DistributedError::TunnelKeyMismatch { .. })
        ));
        // A key from another pair does not transfer.
        assert!(keys.confirm("a", "c", k).is_err());
    }

    #[test]
    fn test_release_invalidates_key() {
        let mut keys = TunnelKeys::default();
        let k = keys.allocate("a", "b").unwrap();
        keys.release("a", "b", k);
        assert!(keys.confirm("a", "b", k).is_err());
    }

    #[test]
    fn test_keys_distinct_across_pairs() {
        let mut keys = TunnelKeys::default();
        let k1 = keys.allocate("a", "b").unwrap();
        let k2 = keys.allocate("a", "c").unwrap();
        assert_ne!(k1, k2);
    }
}
