//! Topology Model
//!
//! The authoritative in-memory model of one session's emulated network:
//! nodes, their interfaces, explicit wired links, and wireless networks
//! with their derived (implicit) adjacency. All mutation goes through
//! the operations on [`Topology`]; a rejected operation leaves the
//! model unchanged.

mod links;
mod mac;

pub use links::{LinkOp, LinkOutcome, LinkParams};
pub use mac::{MacAddr, MacAllocator, DEFAULT_MAC_SEED};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;

/// Errors related to topology operations.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("node already exists: {0}")]
    NodeExists(u32),

    #[error("node not found: {0}")]
    NodeNotFound(u32),

    #[error("no link between nodes {0} and {1}")]
    LinkNotFound(u32, u32),

    #[error("node {0} is not a wireless network")]
    NotWireless(u32),

    #[error("interface {index} not found on node {node}")]
    InterfaceNotFound { node: u32, index: u32 },
}

// ============================================================================
// Node Types
// ============================================================================

/// Node type identifiers.
///
/// Codes 2 and 3 are reserved; an unrecognized code is a hard
/// per-message error at decode time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum NodeType {
    /// Default namespace-backed router/host.
    Router = 0,
    /// Physical testbed machine.
    Physical = 1,
    /// Layer-2 switch.
    Switch = 4,
    /// Layer-1 hub.
    Hub = 5,
    /// Wireless LAN network node; members gain implicit adjacency.
    WirelessLan = 6,
    /// RJ45 physical-interface passthrough.
    Rj45 = 7,
    /// Tunnel endpoint.
    Tunnel = 8,
    /// Secondary (kernel) tunnel endpoint.
    SecondaryTunnel = 9,
    /// EMANE-backed wireless network node.
    Emane = 10,
}

impl NodeType {
    /// Try to convert from a wire code.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(NodeType::Router),
            1 => Some(NodeType::Physical),
            4 => Some(NodeType::Switch),
            5 => Some(NodeType::Hub),
            6 => Some(NodeType::WirelessLan),
            7 => Some(NodeType::Rj45),
            8 => Some(NodeType::Tunnel),
            9 => Some(NodeType::SecondaryTunnel),
            10 => Some(NodeType::Emane),
            _ => None,
        }
    }

    /// Convert to a wire code.
    pub fn to_code(self) -> u32 {
        self as u32
    }

    /// True for node types that represent a network rather than a host.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            NodeType::Switch
                | NodeType::Hub
                | NodeType::WirelessLan
                | NodeType::Tunnel
                | NodeType::SecondaryTunnel
                | NodeType::Emane
        )
    }

    /// True for wireless network types whose members gain implicit
    /// adjacency instead of explicit links.
    pub fn is_wireless(&self) -> bool {
        matches!(self, NodeType::WirelessLan | NodeType::Emane)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeType::Router => "router",
            NodeType::Physical => "physical",
            NodeType::Switch => "switch",
            NodeType::Hub => "hub",
            NodeType::WirelessLan => "wlan",
            NodeType::Rj45 => "rj45",
            NodeType::Tunnel => "tunnel",
            NodeType::SecondaryTunnel => "ktunnel",
            NodeType::Emane => "emane",
        };
        write!(f, "{}", name)
    }
}

// ============================================================================
// Interfaces
// ============================================================================

/// A network interface owned by a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interface {
    /// Owning node id.
    pub node: u32,
    /// Interface index, unique and monotonic per node.
    pub index: u32,
    /// IPv4 address and prefix length, if configured.
    pub ip4: Option<(Ipv4Addr, u16)>,
    /// IPv6 address and prefix length, if configured.
    pub ip6: Option<(Ipv6Addr, u16)>,
    /// MAC address; auto-allocated when absent from the request.
    pub mac: Option<MacAddr>,
}

/// Interface fields supplied by a request. Unset fields are left alone
/// (IP addresses are never invented; a missing MAC is allocated from
/// the session counter).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InterfaceParams {
    pub index: Option<u32>,
    pub ip4: Option<(Ipv4Addr, u16)>,
    pub ip6: Option<(Ipv6Addr, u16)>,
    pub mac: Option<MacAddr>,
}

// ============================================================================
// Link Effects
// ============================================================================

/// Per-link traffic effects. Each parameter is independently optional.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkEffects {
    /// Bandwidth in bits per second.
    pub bandwidth: Option<u64>,
    /// One-way delay in microseconds.
    pub delay: Option<u64>,
    /// Delay jitter in microseconds.
    pub jitter: Option<u64>,
    /// Packet error rate, percent (100 means total loss).
    pub per: Option<u16>,
    /// Packet duplication rate, percent.
    pub dup: Option<u16>,
}

impl LinkEffects {
    /// Overlay the supplied parameters onto this set; fields absent
    /// from `other` are preserved.
    pub fn merge(&mut self, other: &LinkEffects) {
        if other.bandwidth.is_some() {
            self.bandwidth = other.bandwidth;
        }
        if other.delay.is_some() {
            self.delay = other.delay;
        }
        if other.jitter.is_some() {
            self.jitter = other.jitter;
        }
        if other.per.is_some() {
            self.per = other.per;
        }
        if other.dup.is_some() {
            self.dup = other.dup;
        }
    }

    /// True when the supplied packet-error-rate means total loss,
    /// which is treated identically to an explicit delete.
    pub fn is_total_loss(&self) -> bool {
        self.per == Some(100)
    }
}

// ============================================================================
// Links
// ============================================================================

/// An explicit wired link between two endpoints.
///
/// Endpoints are an unordered pair; `effects` applies to the
/// node1→node2 direction and `reverse` (when present) to node2→node1.
/// A symmetric link keeps `reverse` empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    pub node1: u32,
    pub iface1: Option<u32>,
    pub node2: u32,
    pub iface2: Option<u32>,
    pub effects: LinkEffects,
    pub reverse: Option<LinkEffects>,
    /// Tunnel key, set only for tunnel-backed links.
    pub key: Option<u32>,
}

impl Link {
    /// True if this link connects the given unordered node pair.
    pub fn connects(&self, a: u32, b: u32) -> bool {
        (self.node1 == a && self.node2 == b) || (self.node1 == b && self.node2 == a)
    }
}

// ============================================================================
// Wireless Networks
// ============================================================================

/// Derived state of one wireless-network node: which nodes are members
/// and which member pairs are currently in range of each other.
///
/// Implicit adjacency is never stored as a [`Link`]; it exists only
/// here.
#[derive(Clone, Debug, Default)]
pub struct WirelessNetwork {
    /// Member node id → aggregate link effects for that member.
    pub members: BTreeMap<u32, LinkEffects>,
    /// In-range member pairs, stored with the smaller id first.
    pub adjacency: BTreeSet<(u32, u32)>,
}

impl WirelessNetwork {
    fn pair(a: u32, b: u32) -> (u32, u32) {
        if a < b {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// Record or refresh membership of a node.
    pub fn join(&mut self, node: u32, effects: &LinkEffects) {
        self.members.entry(node).or_default().merge(effects);
    }

    /// Drop a member and any adjacency referencing it.
    pub fn leave(&mut self, node: u32) {
        self.members.remove(&node);
        self.adjacency.retain(|&(a, b)| a != node && b != node);
    }

    /// True if both nodes are members.
    pub fn has_members(&self, a: u32, b: u32) -> bool {
        self.members.contains_key(&a) && self.members.contains_key(&b)
    }

    /// Mark two members as in range of each other.
    pub fn link_members(&mut self, a: u32, b: u32) {
        self.adjacency.insert(Self::pair(a, b));
    }

    /// Mark two members as out of range.
    pub fn unlink_members(&mut self, a: u32, b: u32) {
        self.adjacency.remove(&Self::pair(a, b));
    }

    /// True if the two members are currently in range.
    pub fn members_linked(&self, a: u32, b: u32) -> bool {
        self.adjacency.contains(&Self::pair(a, b))
    }
}

// ============================================================================
// Nodes
// ============================================================================

/// One emulated node.
#[derive(Clone, Debug)]
pub struct Node {
    pub id: u32,
    pub name: String,
    pub node_type: NodeType,
    /// Owning emulation-server name; empty means the local server.
    pub server: String,
    /// Interfaces in creation order.
    pub interfaces: Vec<Interface>,
    /// Configured service names.
    pub services: Vec<String>,
    /// Canvas coordinates, carried for controllers but never interpreted.
    pub position: Option<(u16, u16)>,
}

impl Node {
    /// Next free interface index (monotonic per node).
    pub fn next_iface_index(&self) -> u32 {
        self.interfaces
            .iter()
            .map(|i| i.index + 1)
            .max()
            .unwrap_or(0)
    }

    /// Look up an interface by index.
    pub fn iface(&self, index: u32) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.index == index)
    }
}

/// Node fields supplied by a request.
#[derive(Clone, Debug, Default)]
pub struct NodeParams {
    pub id: u32,
    pub node_type: Option<NodeType>,
    pub name: Option<String>,
    pub server: Option<String>,
    pub services: Option<Vec<String>>,
    pub position: Option<(u16, u16)>,
    pub iface: Option<InterfaceParams>,
}

// ============================================================================
// Topology
// ============================================================================

/// The session's node/link registry.
#[derive(Debug, Default)]
pub struct Topology {
    nodes: BTreeMap<u32, Node>,
    links: Vec<Link>,
    wireless: BTreeMap<u32, WirelessNetwork>,
    mac: MacAllocator,
}

impl Topology {
    /// Create an empty topology with the given MAC allocation seed.
    pub fn new(mac_seed: u64) -> Self {
        Self {
            mac: MacAllocator::new(mac_seed),
            ..Self::default()
        }
    }

    /// All nodes, keyed by id.
    pub fn nodes(&self) -> &BTreeMap<u32, Node> {
        &self.nodes
    }

    /// All explicit wired links.
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Wireless network state for a wireless node, if it is one.
    pub fn wireless(&self, node: u32) -> Option<&WirelessNetwork> {
        self.wireless.get(&node)
    }

    /// Look up a node.
    pub fn node(&self, id: u32) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Add a node. Rejects a duplicate id.
    pub fn add_node(&mut self, params: NodeParams) -> Result<&Node, ModelError> {
        if self.nodes.contains_key(&params.id) {
            return Err(ModelError::NodeExists(params.id));
        }
        let node_type = params.node_type.unwrap_or(NodeType::Router);
        let mut node = Node {
            id: params.id,
            name: params
                .name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| format!("n{}", params.id)),
            node_type,
            server: params.server.unwrap_or_default(),
            interfaces: Vec::new(),
            services: params.services.unwrap_or_default(),
            position: params.position,
        };
        if node_type.is_wireless() {
            self.wireless.insert(params.id, WirelessNetwork::default());
        }
        if let Some(iface) = params.iface {
            let assigned = self.build_interface(&mut node, iface);
            node.interfaces.push(assigned);
        }
        self.nodes.insert(params.id, node);
        Ok(&self.nodes[&params.id])
    }

    /// Modify an existing node. Rejects a missing id.
    pub fn modify_node(&mut self, params: NodeParams) -> Result<&Node, ModelError> {
        let Some(mut node) = self.nodes.remove(&params.id) else {
            return Err(ModelError::NodeNotFound(params.id));
        };
        if let Some(name) = params.name.filter(|n| !n.is_empty()) {
            node.name = name;
        }
        if let Some(server) = params.server {
            node.server = server;
        }
        if let Some(services) = params.services {
            node.services = services;
        }
        if let Some(position) = params.position {
            node.position = Some(position);
        }
        if let Some(iface) = params.iface {
            let assigned = self.build_interface(&mut node, iface);
            match node.interfaces.iter_mut().find(|i| i.index == assigned.index) {
                Some(existing) => *existing = assigned,
                None => node.interfaces.push(assigned),
            }
        }
        self.nodes.insert(params.id, node);
        Ok(&self.nodes[&params.id])
    }

    /// Delete a node, its links, and its wireless memberships.
    pub fn delete_node(&mut self, id: u32) -> Result<Node, ModelError> {
        let node = self.nodes.remove(&id).ok_or(ModelError::NodeNotFound(id))?;
        self.links.retain(|l| l.node1 != id && l.node2 != id);
        self.wireless.remove(&id);
        for net in self.wireless.values_mut() {
            net.leave(id);
        }
        Ok(node)
    }

    /// Remove every node and link, leaving the session reusable.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.links.clear();
        self.wireless.clear();
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Build an interface for a node from request parameters,
    /// allocating the index and MAC when unspecified.
    fn build_interface(&mut self, node: &mut Node, params: InterfaceParams) -> Interface {
        let index = params.index.unwrap_or_else(|| node.next_iface_index());
        let mac = match params.mac {
            Some(mac) => Some(mac),
            // MAC is the only field we invent; IPs stay unset.
            None => Some(self.mac.allocate()),
        };
        Interface {
            node: node.id,
            index,
            ip4: params.ip4,
            ip6: params.ip6,
            mac,
        }
    }

    pub(crate) fn find_link(&self, a: u32, b: u32) -> Option<usize> {
        self.links.iter().position(|l| l.connects(a, b))
    }

    pub(crate) fn links_mut(&mut self) -> &mut Vec<Link> {
        &mut self.links
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut BTreeMap<u32, Node> {
        &mut self.nodes
    }

    pub(crate) fn wireless_mut(&mut self, node: u32) -> Option<&mut WirelessNetwork> {
        self.wireless.get_mut(&node)
    }

    /// Wireless network (id) that both nodes are members of, if any.
    pub fn common_wireless(&self, a: u32, b: u32) -> Option<u32> {
        self.wireless
            .iter()
            .find(|(_, net)| net.has_members(a, b))
            .map(|(id, _)| *id)
    }

    /// Wireless network (id) that the given node is a member of, if any.
    pub fn wireless_membership(&self, node: u32) -> Option<u32> {
        self.wireless
            .iter()
            .find(|(_, net)| net.members.contains_key(&node))
            .map(|(id, _)| *id)
    }

    pub(crate) fn allocate_mac(&mut self) -> MacAddr {
        self.mac.allocate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topo() -> Topology {
        Topology::new(0x00163e000000)
    }

    fn router(id: u32) -> NodeParams {
        NodeParams {
            id,
            node_type: Some(NodeType::Router),
            ..NodeParams::default()
        }
    }

    #[test]
    fn test_node_type_codes() {
        for code in [0u32, 1, 4, 5, 6, 7, 8, 9, 10] {
            let ty = NodeType::from_code(code).unwrap();
            assert_eq!(ty.to_code(), code);
        }
        // Reserved and out-of-range codes are rejected.
        assert!(NodeType::from_code(2).is_none());
        assert!(NodeType::from_code(3).is_none());
        assert!(NodeType::from_code(11).is_none());
    }

    #[test]
    fn test_add_node_defaults_name() {
        let mut t = topo();
        let node = t.add_node(router(5)).unwrap();
        assert_eq!(node.name, "n5");
        assert_eq!(node.node_type, NodeType::Router);
    }

    #[test]
    fn test_duplicate_add_rejected() {
        let mut t = topo();
        t.add_node(router(1)).unwrap();
        assert!(matches!(t.add_node(router(1)), Err(ModelError::NodeExists(1))));
        assert_eq!(t.node_count(), 1);
    }

    #[test]
    fn test_modify_missing_node_rejected() {
        let mut t = topo();
        assert!(matches!(
            t.modify_node(router(9)),
            Err(ModelError::NodeNotFound(9))
        ));
    }

    #[test]
    fn test_delete_node_drops_links_and_membership() {
        let mut t = topo();
        t.add_node(NodeParams {
            id: 1,
            node_type: Some(NodeType::WirelessLan),
            ..NodeParams::default()
        })
        .unwrap();
        t.add_node(router(2)).unwrap();
        t.add_node(router(3)).unwrap();
        t.wireless_mut(1).unwrap().join(2, &LinkEffects::default());
        t.wireless_mut(1).unwrap().join(3, &LinkEffects::default());
        t.wireless_mut(1).unwrap().link_members(2, 3);

        t.delete_node(3).unwrap();
        let net = t.wireless(1).unwrap();
        assert!(!net.members.contains_key(&3));
        assert!(net.adjacency.is_empty());
    }

    #[test]
    fn test_interface_index_monotonic() {
        let mut t = topo();
        t.add_node(NodeParams {
            id: 1,
            iface: Some(InterfaceParams::default()),
            ..router(1)
        })
        .unwrap();
        t.modify_node(NodeParams {
            id: 1,
            iface: Some(InterfaceParams::default()),
            ..NodeParams::default()
        })
        .unwrap();

        let node = t.node(1).unwrap();
        let indexes: Vec<u32> = node.interfaces.iter().map(|i| i.index).collect();
        assert_eq!(indexes, vec![0, 1]);
        // MACs are invented; IPs are not.
        assert!(node.interfaces.iter().all(|i| i.mac.is_some()));
        assert!(node.interfaces.iter().all(|i| i.ip4.is_none()));
    }

    #[test]
    fn test_effects_merge_preserves_unset() {
        let mut base = LinkEffects {
            bandwidth: Some(1000),
            delay: Some(50),
            ..LinkEffects::default()
        };
        base.merge(&LinkEffects {
            delay: Some(75),
            per: Some(10),
            ..LinkEffects::default()
        });
        assert_eq!(base.bandwidth, Some(1000));
        assert_eq!(base.delay, Some(75));
        assert_eq!(base.per, Some(10));
    }
}
