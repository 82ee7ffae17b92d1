//! Collaborator Interfaces
//!
//! The orchestration engine never creates namespaces, bridges, or
//! traffic-shaping disciplines itself; it drives narrow collaborator
//! traits with the shapes below. Implementations live outside this
//! crate. [`NullProvisioner`] is provided for dry runs and tests.

use crate::model::{Interface, LinkEffects, NodeType};
use crate::session::SessionState;
use std::fmt;
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

/// Errors surfaced by provisioning collaborators. Each failure is
/// scoped to the node or link being provisioned; the deployment
/// continues with unrelated elements.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("node provisioning failed: {0}")]
    Node(String),

    #[error("interface attachment failed: {0}")]
    Interface(String),

    #[error("link provisioning failed: {0}")]
    Link(String),

    #[error("service bundle unavailable for '{service}' on node {node}")]
    ServiceUnavailable { node: u32, service: String },

    #[error("cancelled")]
    Cancelled,
}

/// Opaque handle to a provisioned node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeHandle(pub u64);

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle:{}", self.0)
    }
}

/// What to create for one node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeSpec {
    pub id: u32,
    pub node_type: NodeType,
    pub name: String,
}

/// One end of a link to realize.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkSpec {
    pub node1: u32,
    pub iface1: Option<u32>,
    pub node2: u32,
    pub iface2: Option<u32>,
}

/// Remote end of a cross-server tunnel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub server: String,
    pub host: String,
    pub port: u16,
}

/// Node/link provisioning collaborator.
pub trait Provisioner: Send + Sync {
    fn create_node(&self, spec: &NodeSpec) -> Result<NodeHandle, ProvisionError>;
    fn destroy_node(&self, handle: NodeHandle) -> Result<(), ProvisionError>;
    fn attach_interface(&self, handle: NodeHandle, iface: &Interface)
        -> Result<(), ProvisionError>;
    fn create_bridge_link(&self, link: &LinkSpec) -> Result<(), ProvisionError>;
    fn create_tunnel_link(
        &self,
        link: &LinkSpec,
        remote: &RemoteEndpoint,
        key: u32,
    ) -> Result<(), ProvisionError>;
    fn apply_link_effects(&self, link: &LinkSpec, effects: &LinkEffects)
        -> Result<(), ProvisionError>;
}

/// Per-node service customization bundle. The engine stores and
/// forwards these; file contents are never interpreted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceBundle {
    /// Generated (file name, contents) pairs.
    pub files: Vec<(String, String)>,
    /// Per-node directories to create.
    pub dirs: Vec<String>,
    /// Startup command list.
    pub startup: Vec<String>,
    /// Shutdown command list.
    pub shutdown: Vec<String>,
    /// Validation command list.
    pub validate: Vec<String>,
    /// Startup ordering index; lower boots earlier.
    pub startup_index: u32,
}

/// Service-customization collaborator.
pub trait ServiceRegistry: Send + Sync {
    /// Fetch the bundle for a (node, service) pair.
    fn bundle(&self, node: u32, service: &str) -> Result<ServiceBundle, ProvisionError>;

    /// Accept a controller-customized bundle.
    fn store(&self, node: u32, service: &str, bundle: ServiceBundle);
}

/// Hook-script collaborator, invoked when a session enters a state.
/// The return value is the script's exit status; it is logged and
/// never blocks the transition.
pub trait HookRunner: Send + Sync {
    fn run(&self, script: &str, state: SessionState) -> i32;
}

// ============================================================================
// Null implementations
// ============================================================================

/// Provisioner that realizes nothing, for dry runs and tests. Handles
/// are allocated so teardown paths stay exercised.
#[derive(Debug, Default)]
pub struct NullProvisioner {
    next_handle: Mutex<u64>,
}

impl Provisioner for NullProvisioner {
    fn create_node(&self, spec: &NodeSpec) -> Result<NodeHandle, ProvisionError> {
        let mut next = self.next_handle.lock().unwrap_or_else(|e| e.into_inner());
        *next += 1;
        debug!(node = spec.id, ty = %spec.node_type, "null: create_node");
        Ok(NodeHandle(*next))
    }

    fn destroy_node(&self, handle: NodeHandle) -> Result<(), ProvisionError> {
        debug!(%handle, "null: destroy_node");
        Ok(())
    }

    fn attach_interface(
        &self,
        handle: NodeHandle,
        iface: &Interface,
    ) -> Result<(), ProvisionError> {
        debug!(%handle, index = iface.index, "null: attach_interface");
        Ok(())
    }

    fn create_bridge_link(&self, link: &LinkSpec) -> Result<(), ProvisionError> {
        debug!(node1 = link.node1, node2 = link.node2, "null: create_bridge_link");
        Ok(())
    }

    fn create_tunnel_link(
        &self,
        link: &LinkSpec,
        remote: &RemoteEndpoint,
        key: u32,
    ) -> Result<(), ProvisionError> {
        debug!(
            node1 = link.node1,
            node2 = link.node2,
            server = %remote.server,
            key,
            "null: create_tunnel_link"
        );
        Ok(())
    }

    fn apply_link_effects(
        &self,
        link: &LinkSpec,
        _effects: &LinkEffects,
    ) -> Result<(), ProvisionError> {
        debug!(node1 = link.node1, node2 = link.node2, "null: apply_link_effects");
        Ok(())
    }
}

/// Service registry that serves empty bundles and forgets stores.
#[derive(Debug, Default)]
pub struct NullServiceRegistry;

impl ServiceRegistry for NullServiceRegistry {
    fn bundle(&self, node: u32, service: &str) -> Result<ServiceBundle, ProvisionError> {
        debug!(node, service, "null: bundle");
        Ok(ServiceBundle::default())
    }

    fn store(&self, node: u32, service: &str, _bundle: ServiceBundle) {
        debug!(node, service, "null: store");
    }
}

/// Hook runner that executes nothing and reports success.
#[derive(Debug, Default)]
pub struct NullHookRunner;

impl HookRunner for NullHookRunner {
    fn run(&self, _script: &str, state: SessionState) -> i32 {
        debug!(%state, "null: hook run");
        0
    }
}
