//! Link resolution.
//!
//! A link request between two endpoints resolves in one of three ways:
//! an explicit wired [`super::Link`], an attachment of a host to a
//! network node, or an implicit adjacency change inside a wireless
//! network both endpoints already belong to. A packet-error-rate of
//! 100% supplied by an add or modify is treated identically to an
//! explicit delete on every path.

use super::{
    InterfaceParams, Link, LinkEffects, ModelError, NodeType, Topology,
};
use crate::wire::MessageOp;
use tracing::debug;

/// Requested link operation, taken from the message flags (the flag is
/// part of the request, never inferred).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkOp {
    Add,
    Modify,
    Delete,
}

impl From<MessageOp> for LinkOp {
    fn from(op: MessageOp) -> Self {
        match op {
            MessageOp::Add => LinkOp::Add,
            MessageOp::Modify => LinkOp::Modify,
            MessageOp::Delete => LinkOp::Delete,
        }
    }
}

/// Link fields supplied by a request.
#[derive(Clone, Debug, Default)]
pub struct LinkParams {
    pub node1: u32,
    pub node2: u32,
    pub iface1: Option<InterfaceParams>,
    pub iface2: Option<InterfaceParams>,
    pub effects: LinkEffects,
    /// Effects apply to the node1→node2 direction only.
    pub unidirectional: bool,
    /// Tunnel key for tunnel-backed links.
    pub key: Option<u32>,
}

/// How a link request resolved. Broadcast decisions and logging key off
/// this; implicit outcomes never produce a `Link` entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkOutcome {
    /// New explicit wired link created.
    WiredCreated,
    /// Existing explicit link updated in place.
    WiredUpdated,
    /// Explicit link removed (explicit delete or 100% loss).
    WiredDeleted,
    /// Node attached to a network node's membership.
    Joined { network: u32, member: u32 },
    /// Node detached from a network node's membership.
    Left { network: u32, member: u32 },
    /// Implicit wireless adjacency created or refreshed.
    AdjacencyUpdated { network: u32 },
    /// Implicit wireless adjacency removed.
    AdjacencyRemoved { network: u32 },
}

impl Topology {
    /// Resolve and apply a link request. On error the model is
    /// unchanged.
    pub fn apply_link(&mut self, op: LinkOp, params: LinkParams) -> Result<LinkOutcome, ModelError> {
        let (n1, n2) = (params.node1, params.node2);
        if self.node(n1).is_none() {
            return Err(ModelError::NodeNotFound(n1));
        }
        if self.node(n2).is_none() {
            return Err(ModelError::NodeNotFound(n2));
        }

        match op {
            LinkOp::Delete => self.delete_link(&params),
            LinkOp::Add => match self.find_link(n1, n2) {
                Some(idx) => Ok(self.update_existing(idx, &params)),
                None => self.add_unmatched(params),
            },
            LinkOp::Modify => match self.find_link(n1, n2) {
                Some(idx) => Ok(self.update_existing(idx, &params)),
                None => self.modify_implicit(&params),
            },
        }
    }

    /// Update a matched wired edge in place, or delete it when the
    /// request carries total loss.
    fn update_existing(&mut self, idx: usize, params: &LinkParams) -> LinkOutcome {
        if params.effects.is_total_loss() {
            self.links_mut().remove(idx);
            debug!(
                node1 = params.node1,
                node2 = params.node2,
                "Total loss treated as link delete"
            );
            return LinkOutcome::WiredDeleted;
        }
        self.update_wired(idx, params);
        LinkOutcome::WiredUpdated
    }

    /// Explicit delete: remove the wired edge, or failing that the
    /// implicit adjacency in a shared wireless network (a no-op at the
    /// `Link` entity level).
    fn delete_link(&mut self, params: &LinkParams) -> Result<LinkOutcome, ModelError> {
        let (n1, n2) = (params.node1, params.node2);
        if let Some(idx) = self.find_link(n1, n2) {
            self.links_mut().remove(idx);
            return Ok(LinkOutcome::WiredDeleted);
        }
        // Deleting the attachment of a host to a network node.
        if let Some(network) = self.attachment_network(n1, n2) {
            let member = if network == n1 { n2 } else { n1 };
            if let Some(net) = self.wireless_mut(network) {
                net.leave(member);
                return Ok(LinkOutcome::Left { network, member });
            }
        }
        if let Some(network) = self.common_wireless(n1, n2) {
            if let Some(net) = self.wireless_mut(network) {
                net.unlink_members(n1, n2);
            }
            return Ok(LinkOutcome::AdjacencyRemoved { network });
        }
        Err(ModelError::LinkNotFound(n1, n2))
    }

    /// Modify with no matching wired edge: only an implicit adjacency
    /// inside a common wireless network can be the target.
    fn modify_implicit(&mut self, params: &LinkParams) -> Result<LinkOutcome, ModelError> {
        let (n1, n2) = (params.node1, params.node2);
        let network = self
            .common_wireless(n1, n2)
            .ok_or(ModelError::LinkNotFound(n1, n2))?;
        Ok(self.update_adjacency(network, params))
    }

    /// Add with no matching wired edge: attachment, RJ45 redirect,
    /// implicit adjacency, or a new explicit link, in that order.
    fn add_unmatched(&mut self, params: LinkParams) -> Result<LinkOutcome, ModelError> {
        let (n1, n2) = (params.node1, params.node2);
        let ty1 = self.node_type_of(n1);
        let ty2 = self.node_type_of(n2);

        // Host attaching to a wireless network node.
        if ty1.is_wireless() != ty2.is_wireless() {
            let (network, member, member_iface) = if ty1.is_wireless() {
                (n1, n2, params.iface2.clone())
            } else {
                (n2, n1, params.iface1.clone())
            };
            return Ok(self.attach_member(network, member, member_iface, &params.effects));
        }

        // RJ45 passthrough: redirect into the wireless network the
        // other endpoint already belongs to, if any.
        if ty1 == NodeType::Rj45 || ty2 == NodeType::Rj45 {
            let (rj45, other) = if ty1 == NodeType::Rj45 { (n1, n2) } else { (n2, n1) };
            if let Some(network) = self.wireless_membership(other) {
                debug!(rj45, network, "RJ45 link redirected to wireless network");
                return Ok(self.attach_member(network, rj45, None, &params.effects));
            }
        }

        // Both endpoints already share a wireless network: implicit
        // adjacency change, no Link entity.
        if let Some(network) = self.common_wireless(n1, n2) {
            return Ok(self.update_adjacency(network, &params));
        }

        if params.effects.is_total_loss() {
            // Delete-equivalent of a link that does not exist.
            return Err(ModelError::LinkNotFound(n1, n2));
        }

        self.create_wired(params)
    }

    /// Attach (or, on total loss, detach) a member of a wireless
    /// network, refreshing its aggregate effects. Idempotent.
    fn attach_member(
        &mut self,
        network: u32,
        member: u32,
        iface: Option<InterfaceParams>,
        effects: &LinkEffects,
    ) -> LinkOutcome {
        if effects.is_total_loss() {
            if let Some(net) = self.wireless_mut(network) {
                net.leave(member);
            }
            return LinkOutcome::Left { network, member };
        }
        let newly_joined = self
            .wireless(network)
            .map(|net| !net.members.contains_key(&member))
            .unwrap_or(false);
        if newly_joined {
            self.ensure_interface(member, iface);
        }
        if let Some(net) = self.wireless_mut(network) {
            net.join(member, effects);
        }
        LinkOutcome::Joined { network, member }
    }

    /// Update the implicit adjacency between two members of a wireless
    /// network. Total loss removes the adjacency; anything else
    /// records/refreshes it along with per-member effects.
    fn update_adjacency(&mut self, network: u32, params: &LinkParams) -> LinkOutcome {
        let (n1, n2) = (params.node1, params.node2);
        let effects = params.effects;
        let Some(net) = self.wireless_mut(network) else {
            return LinkOutcome::AdjacencyRemoved { network };
        };
        if effects.is_total_loss() {
            net.unlink_members(n1, n2);
            LinkOutcome::AdjacencyRemoved { network }
        } else {
            net.join(n1, &effects);
            net.join(n2, &effects);
            net.link_members(n1, n2);
            LinkOutcome::AdjacencyUpdated { network }
        }
    }

    /// Update an existing wired link in place. A unidirectional update
    /// touches only the direction given by the request's endpoint
    /// order; a symmetric update collapses any per-direction split.
    fn update_wired(&mut self, idx: usize, params: &LinkParams) {
        let forward = self.links()[idx].node1 == params.node1;
        let link = &mut self.links_mut()[idx];
        if params.key.is_some() {
            link.key = params.key;
        }
        if params.unidirectional {
            if link.reverse.is_none() {
                link.reverse = Some(link.effects);
            }
            if forward {
                link.effects.merge(&params.effects);
            } else if let Some(reverse) = link.reverse.as_mut() {
                reverse.merge(&params.effects);
            }
        } else {
            link.effects.merge(&params.effects);
            link.reverse = None;
        }
    }

    /// Create a new explicit wired link, assigning endpoint interfaces
    /// on host-type nodes.
    fn create_wired(&mut self, params: LinkParams) -> Result<LinkOutcome, ModelError> {
        let iface1 = self.ensure_interface(params.node1, params.iface1);
        let iface2 = self.ensure_interface(params.node2, params.iface2);
        self.links_mut().push(Link {
            node1: params.node1,
            iface1,
            node2: params.node2,
            iface2,
            effects: params.effects,
            reverse: if params.unidirectional {
                Some(LinkEffects::default())
            } else {
                None
            },
            key: params.key,
        });
        Ok(LinkOutcome::WiredCreated)
    }

    /// Make sure a host endpoint has an interface for the link,
    /// creating one (with an allocated MAC) when needed. Network-type
    /// endpoints carry no interface.
    fn ensure_interface(&mut self, node_id: u32, params: Option<InterfaceParams>) -> Option<u32> {
        let (is_network, next_index) = match self.node(node_id) {
            Some(node) => (node.node_type.is_network(), node.next_iface_index()),
            None => return None,
        };
        if is_network {
            return None;
        }
        let p = params.unwrap_or_default();
        let index = p.index.unwrap_or(next_index);

        if let Some(node) = self.node(node_id) {
            if node.iface(index).is_some() {
                // Existing interface: update supplied addresses only.
                if let Some(node) = self.nodes_mut().get_mut(&node_id) {
                    if let Some(iface) = node.interfaces.iter_mut().find(|i| i.index == index) {
                        if p.ip4.is_some() {
                            iface.ip4 = p.ip4;
                        }
                        if p.ip6.is_some() {
                            iface.ip6 = p.ip6;
                        }
                        if p.mac.is_some() {
                            iface.mac = p.mac;
                        }
                    }
                }
                return Some(index);
            }
        }

        let mac = match p.mac {
            Some(mac) => mac,
            None => self.allocate_mac(),
        };
        if let Some(node) = self.nodes_mut().get_mut(&node_id) {
            node.interfaces.push(super::Interface {
                node: node_id,
                index,
                ip4: p.ip4,
                ip6: p.ip6,
                mac: Some(mac),
            });
        }
        Some(index)
    }

    /// If one endpoint is a wireless network the other is a member of,
    /// return that network's id.
    fn attachment_network(&self, a: u32, b: u32) -> Option<u32> {
        for (network, member) in [(a, b), (b, a)] {
            if let Some(net) = self.wireless(network) {
                if net.members.contains_key(&member) {
                    return Some(network);
                }
            }
        }
        None
    }

    fn node_type_of(&self, id: u32) -> NodeType {
        self.node(id).map(|n| n.node_type).unwrap_or(NodeType::Router)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NodeParams, Topology};

    fn topo() -> Topology {
        Topology::new(0x00163e000000)
    }

    fn add(t: &mut Topology, id: u32, ty: NodeType) {
        t.add_node(NodeParams {
            id,
            node_type: Some(ty),
            ..NodeParams::default()
        })
        .unwrap();
    }

    fn link(n1: u32, n2: u32) -> LinkParams {
        LinkParams {
            node1: n1,
            node2: n2,
            ..LinkParams::default()
        }
    }

    #[test]
    fn test_wired_link_between_routers() {
        // Scenario: two routers, one explicit link with parameters.
        let mut t = topo();
        add(&mut t, 1, NodeType::Router);
        add(&mut t, 2, NodeType::Router);

        let params = LinkParams {
            effects: LinkEffects {
                bandwidth: Some(54_000_000),
                delay: Some(5000),
                ..LinkEffects::default()
            },
            ..link(1, 2)
        };
        let outcome = t.apply_link(LinkOp::Add, params).unwrap();
        assert_eq!(outcome, LinkOutcome::WiredCreated);

        assert_eq!(t.links().len(), 1);
        let l = &t.links()[0];
        assert!(l.connects(1, 2));
        assert_eq!(l.effects.bandwidth, Some(54_000_000));
        assert_eq!(l.effects.delay, Some(5000));

        // Both endpoints received interfaces with allocated MACs.
        assert_eq!(t.node(1).unwrap().interfaces.len(), 1);
        assert_eq!(t.node(2).unwrap().interfaces.len(), 1);
        assert!(t.node(1).unwrap().interfaces[0].mac.is_some());
    }

    #[test]
    fn test_link_to_missing_node_rejected() {
        let mut t = topo();
        add(&mut t, 1, NodeType::Router);
        assert!(matches!(
            t.apply_link(LinkOp::Add, link(1, 99)),
            Err(ModelError::NodeNotFound(99))
        ));
        assert!(t.links().is_empty());
    }

    #[test]
    fn test_wireless_membership_instead_of_edge() {
        // Scenario: n2 and n3 join wlan 1; a link request between them
        // becomes implicit adjacency, never a Link entity.
        let mut t = topo();
        add(&mut t, 1, NodeType::WirelessLan);
        add(&mut t, 2, NodeType::Router);
        add(&mut t, 3, NodeType::Router);

        assert_eq!(
            t.apply_link(LinkOp::Add, link(2, 1)).unwrap(),
            LinkOutcome::Joined { network: 1, member: 2 }
        );
        assert_eq!(
            t.apply_link(LinkOp::Add, link(3, 1)).unwrap(),
            LinkOutcome::Joined { network: 1, member: 3 }
        );
        assert_eq!(
            t.apply_link(LinkOp::Add, link(2, 3)).unwrap(),
            LinkOutcome::AdjacencyUpdated { network: 1 }
        );

        assert!(t.links().is_empty());
        let net = t.wireless(1).unwrap();
        assert!(net.has_members(2, 3));
        assert!(net.members_linked(2, 3));
    }

    #[test]
    fn test_implicit_adjacency_idempotent() {
        let mut t = topo();
        add(&mut t, 1, NodeType::WirelessLan);
        add(&mut t, 2, NodeType::Router);
        add(&mut t, 3, NodeType::Router);
        t.apply_link(LinkOp::Add, link(2, 1)).unwrap();
        t.apply_link(LinkOp::Add, link(3, 1)).unwrap();

        let params = LinkParams {
            effects: LinkEffects {
                bandwidth: Some(11_000_000),
                ..LinkEffects::default()
            },
            ..link(2, 3)
        };
        t.apply_link(LinkOp::Add, params.clone()).unwrap();
        t.apply_link(LinkOp::Add, params).unwrap();

        assert!(t.links().is_empty());
        let net = t.wireless(1).unwrap();
        assert_eq!(net.adjacency.len(), 1);
        assert_eq!(net.members.len(), 2);
    }

    #[test]
    fn test_total_loss_deletes_wired_link() {
        // Scenario: PER=100 on an existing explicit link deletes it.
        let mut t = topo();
        add(&mut t, 2, NodeType::Router);
        add(&mut t, 3, NodeType::Router);
        t.apply_link(LinkOp::Add, link(2, 3)).unwrap();
        assert_eq!(t.links().len(), 1);

        let params = LinkParams {
            effects: LinkEffects {
                per: Some(100),
                ..LinkEffects::default()
            },
            ..link(2, 3)
        };
        let outcome = t.apply_link(LinkOp::Add, params).unwrap();
        assert_eq!(outcome, LinkOutcome::WiredDeleted);
        assert!(t.links().is_empty());
    }

    #[test]
    fn test_total_loss_on_modify_deletes_wired_link() {
        let mut t = topo();
        add(&mut t, 2, NodeType::Router);
        add(&mut t, 3, NodeType::Router);
        t.apply_link(LinkOp::Add, link(2, 3)).unwrap();

        let params = LinkParams {
            effects: LinkEffects {
                per: Some(100),
                ..LinkEffects::default()
            },
            ..link(2, 3)
        };
        let outcome = t.apply_link(LinkOp::Modify, params).unwrap();
        assert_eq!(outcome, LinkOutcome::WiredDeleted);
        assert!(t.links().is_empty());
    }

    #[test]
    fn test_total_loss_removes_adjacency() {
        // The 100%-loss rule applies uniformly on the wireless path.
        let mut t = topo();
        add(&mut t, 1, NodeType::WirelessLan);
        add(&mut t, 2, NodeType::Router);
        add(&mut t, 3, NodeType::Router);
        t.apply_link(LinkOp::Add, link(2, 1)).unwrap();
        t.apply_link(LinkOp::Add, link(3, 1)).unwrap();
        t.apply_link(LinkOp::Add, link(2, 3)).unwrap();
        assert!(t.wireless(1).unwrap().members_linked(2, 3));

        let params = LinkParams {
            effects: LinkEffects {
                per: Some(100),
                ..LinkEffects::default()
            },
            ..link(2, 3)
        };
        let outcome = t.apply_link(LinkOp::Modify, params).unwrap();
        assert_eq!(outcome, LinkOutcome::AdjacencyRemoved { network: 1 });
        assert!(!t.wireless(1).unwrap().members_linked(2, 3));
    }

    #[test]
    fn test_delete_without_edge_removes_adjacency() {
        let mut t = topo();
        add(&mut t, 1, NodeType::WirelessLan);
        add(&mut t, 2, NodeType::Router);
        add(&mut t, 3, NodeType::Router);
        t.apply_link(LinkOp::Add, link(2, 1)).unwrap();
        t.apply_link(LinkOp::Add, link(3, 1)).unwrap();
        t.apply_link(LinkOp::Add, link(2, 3)).unwrap();

        let outcome = t.apply_link(LinkOp::Delete, link(2, 3)).unwrap();
        assert_eq!(outcome, LinkOutcome::AdjacencyRemoved { network: 1 });
        // Members stay; only the adjacency is gone.
        assert!(t.wireless(1).unwrap().has_members(2, 3));
    }

    #[test]
    fn test_delete_detaches_member_from_network() {
        let mut t = topo();
        add(&mut t, 1, NodeType::WirelessLan);
        add(&mut t, 2, NodeType::Router);
        t.apply_link(LinkOp::Add, link(2, 1)).unwrap();

        let outcome = t.apply_link(LinkOp::Delete, link(2, 1)).unwrap();
        assert_eq!(outcome, LinkOutcome::Left { network: 1, member: 2 });
        assert!(t.wireless(1).unwrap().members.is_empty());
    }

    #[test]
    fn test_delete_missing_link_rejected() {
        let mut t = topo();
        add(&mut t, 1, NodeType::Router);
        add(&mut t, 2, NodeType::Router);
        assert!(matches!(
            t.apply_link(LinkOp::Delete, link(1, 2)),
            Err(ModelError::LinkNotFound(1, 2))
        ));
    }

    #[test]
    fn test_rj45_redirects_to_other_endpoints_network() {
        let mut t = topo();
        add(&mut t, 1, NodeType::WirelessLan);
        add(&mut t, 2, NodeType::Router);
        add(&mut t, 4, NodeType::Rj45);
        t.apply_link(LinkOp::Add, link(2, 1)).unwrap();

        let outcome = t.apply_link(LinkOp::Add, link(4, 2)).unwrap();
        assert_eq!(outcome, LinkOutcome::Joined { network: 1, member: 4 });
        assert!(t.links().is_empty());
    }

    #[test]
    fn test_rj45_without_network_gets_wired_link() {
        let mut t = topo();
        add(&mut t, 2, NodeType::Router);
        add(&mut t, 4, NodeType::Rj45);
        let outcome = t.apply_link(LinkOp::Add, link(4, 2)).unwrap();
        assert_eq!(outcome, LinkOutcome::WiredCreated);
        assert_eq!(t.links().len(), 1);
    }

    #[test]
    fn test_switch_attachment_is_explicit_link() {
        let mut t = topo();
        add(&mut t, 1, NodeType::Switch);
        add(&mut t, 2, NodeType::Router);
        let outcome = t.apply_link(LinkOp::Add, link(2, 1)).unwrap();
        assert_eq!(outcome, LinkOutcome::WiredCreated);
        // The switch side carries no interface.
        let l = &t.links()[0];
        let switch_iface = if l.node1 == 1 { l.iface1 } else { l.iface2 };
        assert!(switch_iface.is_none());
    }

    #[test]
    fn test_unidirectional_modify_tracks_per_direction() {
        let mut t = topo();
        add(&mut t, 1, NodeType::Router);
        add(&mut t, 2, NodeType::Router);
        let params = LinkParams {
            effects: LinkEffects {
                delay: Some(1000),
                ..LinkEffects::default()
            },
            ..link(1, 2)
        };
        t.apply_link(LinkOp::Add, params).unwrap();

        // Slow down only the 2→1 direction.
        let reverse_update = LinkParams {
            effects: LinkEffects {
                delay: Some(9000),
                ..LinkEffects::default()
            },
            unidirectional: true,
            ..link(2, 1)
        };
        t.apply_link(LinkOp::Modify, reverse_update).unwrap();

        let l = &t.links()[0];
        assert_eq!(l.effects.delay, Some(1000));
        assert_eq!(l.reverse.unwrap().delay, Some(9000));

        // A symmetric update collapses the split again.
        let symmetric = LinkParams {
            effects: LinkEffects {
                delay: Some(2000),
                ..LinkEffects::default()
            },
            ..link(1, 2)
        };
        t.apply_link(LinkOp::Modify, symmetric).unwrap();
        let l = &t.links()[0];
        assert_eq!(l.effects.delay, Some(2000));
        assert!(l.reverse.is_none());
    }

    #[test]
    fn test_modify_unmatched_without_network_rejected() {
        let mut t = topo();
        add(&mut t, 1, NodeType::Router);
        add(&mut t, 2, NodeType::Router);
        assert!(matches!(
            t.apply_link(LinkOp::Modify, link(1, 2)),
            Err(ModelError::LinkNotFound(1, 2))
        ));
    }

    #[test]
    fn test_supplied_iface_index_respected() {
        let mut t = topo();
        add(&mut t, 1, NodeType::Router);
        add(&mut t, 2, NodeType::Router);
        let params = LinkParams {
            iface1: Some(InterfaceParams {
                index: Some(3),
                ip4: Some(("10.0.0.1".parse().unwrap(), 24)),
                ..InterfaceParams::default()
            }),
            ..link(1, 2)
        };
        t.apply_link(LinkOp::Add, params).unwrap();
        let iface = t.node(1).unwrap().iface(3).unwrap();
        assert_eq!(iface.ip4, Some(("10.0.0.1".parse().unwrap(), 24)));
        // Next automatic index continues past the supplied one.
        assert_eq!(t.node(1).unwrap().next_iface_index(), 4);
    }
}
