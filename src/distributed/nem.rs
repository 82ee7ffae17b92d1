//! NEM identifier allocation.
//!
//! Each node attached to a wireless-model-backed network needs a NEM
//! (radio model) identifier that is unique across every server
//! participating in the session. This allocator is the single source
//! of truth for the next id; remote servers learn assignments through
//! re-delivered mapping facts, which are idempotent.

use super::DistributedError;
use std::collections::BTreeMap;
use tracing::debug;

/// Globally-unique NEM id allocator with the per-(network, node)
/// mapping table.
#[derive(Debug)]
pub struct NemAllocator {
    next: u32,
    assigned: BTreeMap<(u32, u32), u16>,
}

impl Default for NemAllocator {
    fn default() -> Self {
        Self {
            next: 1,
            assigned: BTreeMap::new(),
        }
    }
}

impl NemAllocator {
    /// Allocate (or return the already-allocated) NEM id for a
    /// (network, node) pair. Allocation happens at most once per pair.
    pub fn allocate(&mut self, network: u32, node: u32) -> Result<u16, DistributedError> {
        if let Some(&nem) = self.assigned.get(&(network, node)) {
            return Ok(nem);
        }
        if self.next > u16::MAX as u32 {
            return Err(DistributedError::NemExhausted);
        }
        let nem = self.next as u16;
        self.next += 1;
        self.assigned.insert((network, node), nem);
        debug!(network, node, nem, "Allocated NEM id");
        Ok(nem)
    }

    /// Record a mapping fact delivered by another server. Re-applying
    /// the identical fact is a no-op; a conflicting value is an error.
    pub fn record(&mut self, network: u32, node: u32, nem: u16) -> Result<(), DistributedError> {
        match self.assigned.get(&(network, node)) {
            Some(&have) if have == nem => Ok(()),
            Some(&have) => Err(DistributedError::NemConflict {
                network,
                node,
                have,
                got: nem,
            }),
            None => {
                self.assigned.insert((network, node), nem);
                // Keep the counter ahead of externally-recorded ids so
                // local allocation never collides with them.
                if nem as u32 >= self.next {
                    self.next = nem as u32 + 1;
                }
                Ok(())
            }
        }
    }

    /// Look up an existing assignment.
    pub fn get(&self, network: u32, node: u32) -> Option<u16> {
        self.assigned.get(&(network, node)).copied()
    }

    /// Number of recorded assignments.
    pub fn len(&self) -> usize {
        self.assigned.len()
    }

    /// True when no assignments exist.
    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_unique_across_pairs() {
        let mut alloc = NemAllocator::default();
        let a = alloc.allocate(10, 1).unwrap();
        let b = alloc.allocate(10, 2).unwrap();
        let c = alloc.allocate(20, 1).unwrap();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }

    #[test]
    fn test_allocation_idempotent_per_pair() {
        let mut alloc = NemAllocator::default();
        let first = alloc.allocate(10, 1).unwrap();
        let again = alloc.allocate(10, 1).unwrap();
        assert_eq!(first, again);
        assert_eq!(alloc.len(), 1);
    }

    #[test]
    fn test_record_idempotent() {
        let mut alloc = NemAllocator::default();
        alloc.record(10, 1, 42).unwrap();
        // Identical re-delivery is a no-op, not an error.
        alloc.record(10, 1, 42).unwrap();
        assert_eq!(alloc.get(10, 1), Some(42));
    }

    #[test]
    fn test_record_conflict_is_error() {
        let mut alloc = NemAllocator::default();
        alloc.record(10, 1, 42).unwrap();
        assert!(matches!(
            alloc.record(10, 1, 43),
            Err(DistributedError::NemConflict { have: 42, got: 43, .. })
        ));
    }

    #[test]
    fn test_local_allocation_skips_recorded_ids() {
        let mut alloc = NemAllocator::default();
        alloc.record(10, 1, 5).unwrap();
        let next = alloc.allocate(10, 2).unwrap();
        assert!(next > 5);
    }

    #[test]
    fn test_exhaustion_is_per_request_fatal() {
        let mut alloc = NemAllocator::default();
        alloc.record(1, 1, u16::MAX).unwrap();
        assert!(matches!(
            alloc.allocate(1, 2),
            Err(DistributedError::NemExhausted)
        ));
        // Existing assignments survive; a corrected retry can succeed.
        assert_eq!(alloc.get(1, 1), Some(u16::MAX));
    }
}
