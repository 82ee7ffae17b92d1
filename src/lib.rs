//! netlab: network emulation control-plane daemon
//!
//! Orchestrates sessions of emulated network topologies: controllers
//! connect over a TLV-framed control channel, build a topology in a
//! session, and drive it through its lifecycle states; provisioning of
//! the actual namespaces, bridges, and tunnels is delegated to
//! collaborator traits.

pub mod channel;
pub mod config;
pub mod daemon;
pub mod distributed;
pub mod exec;
pub mod messages;
pub mod model;
pub mod provision;
pub mod session;
pub mod wire;

// Re-export config types
pub use config::{Config, ConfigError, DaemonConfig, RetryConfig, ServerConfig};

// Re-export wire types
pub use wire::{
    DecodeOutcome, MessageDecoder, MessageFlags, MessageOp, MessageType, RawMessage, WireError,
};

// Re-export message types
pub use messages::{
    ConfigFlag, ConfigureMessage, Decoded, EventMessage, ExceptionLevel, ExceptionMessage,
    ExecuteMessage, FileMessage, LinkMessage, Message, NodeMessage, RegisterMessage,
    SessionMessage,
};

// Re-export model types
pub use model::{
    Interface, Link, LinkEffects, LinkOp, LinkParams, MacAddr, ModelError, Node, NodeParams,
    NodeType, Topology, WirelessNetwork,
};

// Re-export session types
pub use session::{
    EventKind, FileEntry, HookScript, Session, SessionError, SessionInfo, SessionRegistry,
    SessionState,
};

// Re-export distributed-coordination types
pub use distributed::{Coordinator, DistributedError, NemAllocator, ServerMap, TunnelKeys};

// Re-export channel types
pub use channel::{ChannelError, InboundEvent, PeerId, PeerRole, PeerTable, RetryPolicy};

// Re-export collaborator interfaces
pub use provision::{
    HookRunner, LinkSpec, NodeHandle, NodeSpec, NullHookRunner, NullProvisioner,
    NullServiceRegistry, ProvisionError, Provisioner, RemoteEndpoint, ServiceBundle,
    ServiceRegistry,
};

// Re-export daemon types
pub use daemon::{Daemon, DaemonError, DeployReport};

// Re-export exec types
pub use exec::{ExecDispatcher, ExecPurpose, PendingExec};
