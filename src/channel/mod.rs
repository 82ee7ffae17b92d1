//! Peer Channel Management
//!
//! One channel per connected peer: a GUI/script controller or another
//! emulation daemon. The table tracks which sessions each peer has
//! joined so state notifications fan out only to interested peers.
//! Writes go through a bounded per-peer queue; a peer that cannot
//! drain its queue is disconnected rather than back-pressuring the
//! dispatcher.

mod retry;
mod server;

pub use retry::{connect_with_retry, RetryPolicy, RetryState};
pub use server::{serve, InboundEvent};

use crate::wire::WireError;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Capacity of each peer's outbound queue, in messages.
pub const SEND_QUEUE_DEPTH: usize = 256;

/// Errors related to peer channels.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("peer not found: {0}")]
    PeerNotFound(PeerId),

    #[error("peer {0} send queue full, disconnecting")]
    SendQueueFull(PeerId),

    #[error("peer {0} channel closed")]
    ChannelClosed(PeerId),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Identifies one connected peer for the lifetime of its channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer:{}", self.0)
    }
}

/// What kind of peer sits on the other end of a channel. Every channel
/// starts as a controller; a Register message announcing an execution
/// server promotes it to a peer daemon.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PeerRole {
    #[default]
    Controller,
    PeerDaemon,
}

/// Per-peer channel state held in the table.
#[derive(Debug)]
pub struct PeerHandle {
    pub id: PeerId,
    pub role: PeerRole,
    pub addr: SocketAddr,
    /// Sessions this peer has joined.
    pub sessions: BTreeSet<u32>,
    tx: mpsc::Sender<Vec<u8>>,
}

/// The set of connected peers.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<PeerId, PeerHandle>,
    next_id: u64,
}

impl PeerTable {
    /// Register a new channel, returning its peer id and the receive
    /// half of its outbound queue.
    pub fn register(&mut self, addr: SocketAddr) -> (PeerId, mpsc::Receiver<Vec<u8>>) {
        self.next_id += 1;
        let id = PeerId(self.next_id);
        let (tx, rx) = mpsc::channel(SEND_QUEUE_DEPTH);
        self.peers.insert(
            id,
            PeerHandle {
                id,
                role: PeerRole::default(),
                addr,
                sessions: BTreeSet::new(),
                tx,
            },
        );
        info!(peer = %id, %addr, "Peer channel opened");
        (id, rx)
    }

    /// Drop a channel. Idempotent; the read task and the daemon may
    /// both report the same disconnect.
    pub fn remove(&mut self, id: PeerId) {
        if self.peers.remove(&id).is_some() {
            info!(peer = %id, "Peer channel closed");
        }
    }

    /// Look up a peer.
    pub fn get(&self, id: PeerId) -> Option<&PeerHandle> {
        self.peers.get(&id)
    }

    /// Number of connected peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// True when no peers are connected.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Promote a controller channel to a peer-daemon channel.
    pub fn set_role(&mut self, id: PeerId, role: PeerRole) -> Result<(), ChannelError> {
        let peer = self.peers.get_mut(&id).ok_or(ChannelError::PeerNotFound(id))?;
        if peer.role != role {
            debug!(peer = %id, ?role, "Peer role changed");
            peer.role = role;
        }
        Ok(())
    }

    /// Record that a peer joined a session.
    pub fn join_session(&mut self, id: PeerId, session: u32) -> Result<(), ChannelError> {
        let peer = self.peers.get_mut(&id).ok_or(ChannelError::PeerNotFound(id))?;
        if peer.sessions.insert(session) {
            debug!(peer = %id, session, "Peer joined session");
        }
        Ok(())
    }

    /// Record that a peer left a session.
    pub fn leave_session(&mut self, id: PeerId, session: u32) {
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.sessions.remove(&session);
        }
    }

    /// Queue bytes to one peer. A full queue means the peer is not
    /// draining; the caller should disconnect it.
    pub fn send_to(&self, id: PeerId, bytes: Vec<u8>) -> Result<(), ChannelError> {
        let peer = self.peers.get(&id).ok_or(ChannelError::PeerNotFound(id))?;
        match peer.tx.try_send(bytes) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(ChannelError::SendQueueFull(id)),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ChannelError::ChannelClosed(id)),
        }
    }

    /// Fan bytes out to every peer subscribed to a session, except the
    /// originator. Peers with stuck queues are reported back for
    /// disconnection, not treated as a fan-out failure.
    pub fn broadcast_session(
        &self,
        session: u32,
        bytes: &[u8],
        except: Option<PeerId>,
    ) -> Vec<PeerId> {
        let mut stuck = Vec::new();
        for peer in self.peers.values() {
            if Some(peer.id) == except || !peer.sessions.contains(&session) {
                continue;
            }
            match peer.tx.try_send(bytes.to_vec()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(peer = %peer.id, session, "Broadcast dropped, send queue full");
                    stuck.push(peer.id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => stuck.push(peer.id),
            }
        }
        stuck
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:4038".parse().unwrap()
    }

    #[test]
    fn test_register_and_remove() {
        let mut table = PeerTable::default();
        let (id1, _rx1) = table.register(test_addr());
        let (id2, _rx2) = table.register(test_addr());
        assert_ne!(id1, id2);
        assert_eq!(table.len(), 2);

        table.remove(id1);
        assert!(table.get(id1).is_none());
        table.remove(id1); // idempotent
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_send_to_queues_bytes() {
        let mut table = PeerTable::default();
        let (id, mut rx) = table.register(test_addr());
        table.send_to(id, vec![1, 2, 3]).unwrap();
        assert_eq!(rx.try_recv().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_send_to_unknown_peer() {
        let table = PeerTable::default();
        assert!(matches!(
            table.send_to(PeerId(9), vec![]),
            Err(ChannelError::PeerNotFound(PeerId(9)))
        ));
    }

    #[test]
    fn test_full_queue_reported() {
        let mut table = PeerTable::default();
        let (id, _rx) = table.register(test_addr());
        for _ in 0..SEND_QUEUE_DEPTH {
            table.send_to(id, vec![0]).unwrap();
        }
        assert!(matches!(
            table.send_to(id, vec![0]),
            Err(ChannelError::SendQueueFull(_))
        ));
    }

    #[test]
    fn test_broadcast_respects_subscription_and_origin() {
        let mut table = PeerTable::default();
        let (a, mut rx_a) = table.register(test_addr());
        let (b, mut rx_b) = table.register(test_addr());
        let (c, mut rx_c) = table.register(test_addr());
        table.join_session(a, 1).unwrap();
        table.join_session(b, 1).unwrap();
        // c never joins session 1

        let stuck = table.broadcast_session(1, &[7], Some(a));
        assert!(stuck.is_empty());
        assert!(rx_a.try_recv().is_err(), "originator must not receive");
        assert_eq!(rx_b.try_recv().unwrap(), vec![7]);
        assert!(rx_c.try_recv().is_err(), "unsubscribed peer must not receive");
    }

    #[test]
    fn test_role_promotion() {
        let mut table = PeerTable::default();
        let (id, _rx) = table.register(test_addr());
        assert_eq!(table.get(id).unwrap().role, PeerRole::Controller);
        table.set_role(id, PeerRole::PeerDaemon).unwrap();
        assert_eq!(table.get(id).unwrap().role, PeerRole::PeerDaemon);
    }
}
