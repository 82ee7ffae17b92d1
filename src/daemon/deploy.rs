//! State transitions and topology deployment.
//!
//! A transition request walks the forward state chain one state at a
//! time. Entering Instantiation deploys the topology through the
//! provisioning collaborator; entering Shutdown tears it back down.
//! The deployment plan is snapshotted under the session lock, then
//! executed without it, so a slow provisioner never blocks the
//! session's channel workers. Each element failure raises a Fatal
//! exception scoped to that element and the deployment continues.

use super::{Daemon, DaemonError};
use crate::channel::{connect_with_retry, PeerId};
use crate::messages::{
    EventMessage, ExceptionLevel, ExceptionMessage, LinkMessage, Message, NodeMessage,
};
use crate::model::{Interface, LinkEffects, NodeType};
use crate::provision::{LinkSpec, NodeHandle, NodeSpec, RemoteEndpoint};
use crate::session::{EventKind, FileEntry, Session, SessionError, SessionState};
use crate::wire::MessageFlags;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// What one node needs provisioned: the namespace itself, its
/// interfaces, and any controller-pushed file customizations.
#[derive(Debug)]
struct PlannedNode {
    spec: NodeSpec,
    server: String,
    ifaces: Vec<Interface>,
    files: Vec<FileEntry>,
}

/// What one link needs provisioned. Cross-server links carry the
/// remote endpoint and a pre-allocated tunnel key.
#[derive(Debug)]
struct PlannedLink {
    spec: LinkSpec,
    effects: LinkEffects,
    remote: Option<(RemoteEndpoint, u32)>,
}

/// Outcome summary of one deployment pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeployReport {
    pub nodes_ok: usize,
    pub nodes_failed: Vec<u32>,
    pub links_ok: usize,
    pub links_failed: usize,
}

impl Daemon {
    /// Execute a state-transition request, entering each state of the
    /// plan in order and performing its entry actions.
    pub(crate) async fn run_transition(
        &self,
        peer: PeerId,
        id: u32,
        session: &Arc<Mutex<Session>>,
        target: SessionState,
    ) -> Result<(), DaemonError> {
        let plan = { session.lock().await.plan_transition(target)? };

        for state in plan {
            match state {
                SessionState::Instantiation => {
                    let report = self.deploy_session(id, session).await?;
                    info!(
                        session = id,
                        nodes_ok = report.nodes_ok,
                        nodes_failed = report.nodes_failed.len(),
                        links_ok = report.links_ok,
                        links_failed = report.links_failed,
                        "Deployment finished"
                    );
                }
                SessionState::Shutdown => {
                    self.teardown_session(id, session).await;
                }
                _ => {}
            }

            {
                let mut session = session.lock().await;
                session.enter_state(state);
                session.run_hooks(state, self.hook_runner());
            }

            // Notify the session's peers of the committed transition.
            let event = EventMessage {
                event_type: EventKind::State(state),
                node: None,
                name: None,
                data: None,
                time: None,
                session: Some(id),
            };
            self.broadcast(id, MessageFlags::modify(), &Message::Event(event), Some(peer))
                .await;
        }
        Ok(())
    }

    /// Provision the session's topology: nodes first, then wired links
    /// and network attachments.
    pub(crate) async fn deploy_session(
        &self,
        id: u32,
        session: &Arc<Mutex<Session>>,
    ) -> Result<DeployReport, DaemonError> {
        // Plan under the session lock; provision outside it. The guard
        // outlives the lock so a second transition cannot interleave.
        let (_guard, nodes, links) = {
            let mut session = session.lock().await;
            let guard = session.begin_deployment()?;
            session
                .coordinator
                .validate_servers(session.server_names().iter().map(String::as_str))
                .map_err(SessionError::from)?;
            assign_nems(&mut session)?;
            let nodes = plan_nodes(&session);
            let links = plan_links(&mut session)?;
            (guard, nodes, links)
        };

        let mut report = DeployReport::default();
        let mut handles: HashMap<u32, NodeHandle> = HashMap::new();
        let mut failed: BTreeSet<u32> = BTreeSet::new();

        for planned in &nodes {
            // Remote nodes are provisioned by their owning daemon.
            if !planned.server.is_empty() {
                debug!(
                    session = id,
                    node = planned.spec.id,
                    server = %planned.server,
                    "Node deferred to remote server"
                );
                continue;
            }
            match self.provisioner().create_node(&planned.spec) {
                Ok(handle) => {
                    handles.insert(planned.spec.id, handle);
                    report.nodes_ok += 1;
                    for iface in &planned.ifaces {
                        if let Err(err) = self.provisioner().attach_interface(handle, iface) {
                            warn!(
                                session = id,
                                node = planned.spec.id,
                                index = iface.index,
                                error = %err,
                                "Interface attachment failed"
                            );
                            self.broadcast_exception(
                                id,
                                ExceptionMessage::new(
                                    ExceptionLevel::Fatal,
                                    "deploy",
                                    err.to_string(),
                                )
                                .with_node(planned.spec.id),
                            )
                            .await;
                        }
                    }
                    self.push_service_files(id, planned).await;
                }
                Err(err) => {
                    warn!(session = id, node = planned.spec.id, error = %err, "Node provisioning failed");
                    failed.insert(planned.spec.id);
                    report.nodes_failed.push(planned.spec.id);
                    self.broadcast_exception(
                        id,
                        ExceptionMessage::new(ExceptionLevel::Fatal, "deploy", err.to_string())
                            .with_node(planned.spec.id),
                    )
                    .await;
                }
            }
        }

        for planned in &links {
            // A failed endpoint cancels its links, not the deployment.
            if failed.contains(&planned.spec.node1) || failed.contains(&planned.spec.node2) {
                report.links_failed += 1;
                continue;
            }
            let result = match &planned.remote {
                Some((remote, key)) => {
                    self.provisioner()
                        .create_tunnel_link(&planned.spec, remote, *key)
                }
                None => self.provisioner().create_bridge_link(&planned.spec),
            };
            let result = result
                .and_then(|()| {
                    self.provisioner()
                        .apply_link_effects(&planned.spec, &planned.effects)
                });
            match result {
                Ok(()) => report.links_ok += 1,
                Err(err) => {
                    warn!(
                        session = id,
                        node1 = planned.spec.node1,
                        node2 = planned.spec.node2,
                        error = %err,
                        "Link provisioning failed"
                    );
                    report.links_failed += 1;
                    self.broadcast_exception(
                        id,
                        ExceptionMessage::new(ExceptionLevel::Fatal, "deploy", err.to_string()),
                    )
                    .await;
                }
            }
        }

        // The daemon owning the far endpoint realizes its half of each
        // tunnel with the same coordinator-assigned key.
        for planned in &links {
            if failed.contains(&planned.spec.node1) || failed.contains(&planned.spec.node2) {
                continue;
            }
            if let Some((remote, key)) = &planned.remote {
                self.send_tunnel_key(id, &planned.spec, remote, *key).await;
            }
        }

        // Report platform ids back to controllers.
        for (&node, &handle) in &handles {
            let notice = NodeMessage {
                number: node,
                emulation_id: Some(handle.0 as u32),
                session: Some(id),
                ..NodeMessage::default()
            };
            self.broadcast(id, MessageFlags::modify(), &Message::Node(notice), None)
                .await;
        }

        self.handles().lock().await.insert(id, handles);
        Ok(report)
    }

    /// Hand a node's controller-pushed service customizations to the
    /// service registry: fetch the service's bundle, overlay the pushed
    /// file, and store the result back.
    async fn push_service_files(&self, id: u32, planned: &PlannedNode) {
        for entry in &planned.files {
            let Some(service) = &entry.service else {
                continue;
            };
            let mut bundle = match self.services().bundle(planned.spec.id, service) {
                Ok(bundle) => bundle,
                Err(err) => {
                    warn!(
                        session = id,
                        node = planned.spec.id,
                        service = %service,
                        error = %err,
                        "Service bundle unavailable"
                    );
                    self.broadcast_exception(
                        id,
                        ExceptionMessage::new(ExceptionLevel::Error, "deploy", err.to_string())
                            .with_node(planned.spec.id),
                    )
                    .await;
                    continue;
                }
            };
            bundle.files.retain(|(name, _)| name != &entry.name);
            bundle
                .files
                .push((entry.name.clone(), entry.data.clone().unwrap_or_default()));
            self.services().store(planned.spec.id, service, bundle);
            debug!(
                session = id,
                node = planned.spec.id,
                service = %service,
                file = %entry.name,
                "Service file forwarded"
            );
        }
    }

    /// Deliver a keyed link request to the daemon owning the far end of
    /// a cross-server link. Best-effort: an unreachable server raises
    /// an exception and the local half stays up.
    async fn send_tunnel_key(&self, id: u32, spec: &LinkSpec, remote: &RemoteEndpoint, key: u32) {
        let message = Message::Link(LinkMessage {
            node1: spec.node1,
            node2: spec.node2,
            key: Some(key),
            session: Some(id),
            ..LinkMessage::default()
        });
        let bytes = match message.encode(MessageFlags::add()) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(session = id, error = %err, "Failed to encode tunnel-key message");
                return;
            }
        };
        let addr = format!("{}:{}", remote.host, remote.port);
        match connect_with_retry(&addr, self.config.retry.to_policy()).await {
            Ok(mut stream) => {
                match stream.write_all(&bytes).await {
                    Ok(()) => {
                        debug!(session = id, server = %remote.server, key, "Tunnel key sent to peer daemon");
                    }
                    Err(err) => {
                        warn!(session = id, server = %remote.server, error = %err, "Failed to send tunnel key");
                    }
                }
                stream.shutdown().await.ok();
            }
            Err(err) => {
                warn!(session = id, server = %remote.server, error = %err, "Peer daemon unreachable");
                self.broadcast_exception(
                    id,
                    ExceptionMessage::new(
                        ExceptionLevel::Error,
                        "deploy",
                        format!("server {} unreachable: {}", remote.server, err),
                    ),
                )
                .await;
            }
        }
    }

    /// Destroy everything provisioned for a session, nodes last-in
    /// first-out. Teardown is best-effort: failures are logged and the
    /// remaining elements are still destroyed.
    pub(crate) async fn teardown_session(&self, id: u32, _session: &Arc<Mutex<Session>>) {
        let Some(handles) = self.handles().lock().await.remove(&id) else {
            return;
        };
        let mut ordered: Vec<(u32, NodeHandle)> = handles.into_iter().collect();
        ordered.sort_by(|a, b| b.0.cmp(&a.0));
        for (node, handle) in ordered {
            if let Err(err) = self.provisioner().destroy_node(handle) {
                warn!(session = id, node, error = %err, "Node teardown failed");
            }
        }
        info!(session = id, "Session torn down");
    }
}

/// Give every member of a radio-model network a session-unique radio
/// id. Allocation is idempotent, so replanning a partially-deployed
/// session keeps the ids already handed out.
fn assign_nems(session: &mut Session) -> Result<(), SessionError> {
    let pairs: Vec<(u32, u32)> = session
        .topology
        .nodes()
        .values()
        .filter(|node| node.node_type == NodeType::Emane)
        .filter_map(|node| session.topology.wireless(node.id).map(|net| (node.id, net)))
        .flat_map(|(network, net)| net.members.keys().map(move |&member| (network, member)))
        .collect();
    for (network, member) in pairs {
        let nem = session.coordinator.nems.allocate(network, member)?;
        debug!(network, node = member, nem, "Radio id assigned");
    }
    Ok(())
}

fn plan_nodes(session: &Session) -> Vec<PlannedNode> {
    session
        .topology
        .nodes()
        .values()
        .map(|node| PlannedNode {
            spec: NodeSpec {
                id: node.id,
                node_type: node.node_type,
                name: node.name.clone(),
            },
            server: node.server.clone(),
            ifaces: node.interfaces.clone(),
            files: session
                .custom_files
                .iter()
                .filter(|f| f.node == Some(node.id))
                .cloned()
                .collect(),
        })
        .collect()
}

/// Wired links plus wireless-network attachments, with tunnel keys
/// allocated for any link whose endpoints live on different servers.
fn plan_links(session: &mut Session) -> Result<Vec<PlannedLink>, SessionError> {
    let mut planned = Vec::new();

    let links: Vec<_> = session.topology.links().to_vec();
    for link in links {
        let server1 = server_of(session, link.node1);
        let server2 = server_of(session, link.node2);
        let remote = if server1 != server2 {
            // One side is provisioned here; tunnel to the other side's
            // daemon. The far server is whichever is not local.
            let far = if server1.is_empty() { &server2 } else { &server1 };
            let endpoint = session
                .coordinator
                .servers
                .resolve(far)?
                .map(|(host, port)| RemoteEndpoint {
                    server: far.clone(),
                    host,
                    port,
                });
            match endpoint {
                Some(endpoint) => {
                    let key = match link.key {
                        Some(key) => {
                            session.coordinator.tunnels.confirm(&server1, &server2, key)?;
                            key
                        }
                        None => session.coordinator.tunnels.allocate(&server1, &server2)?,
                    };
                    Some((endpoint, key))
                }
                None => None,
            }
        } else {
            None
        };
        planned.push(PlannedLink {
            spec: LinkSpec {
                node1: link.node1,
                iface1: link.iface1,
                node2: link.node2,
                iface2: link.iface2,
            },
            effects: link.effects,
            remote,
        });
    }

    // Attachments: each member of a network node gets a bridge link to
    // the network. Implicit wireless adjacency is radio-model state and
    // is never provisioned as a link.
    let attachments: Vec<(u32, u32, LinkEffects)> = session
        .topology
        .nodes()
        .keys()
        .filter_map(|&network| session.topology.wireless(network).map(|net| (network, net)))
        .flat_map(|(network, net)| {
            net.members
                .iter()
                .map(move |(&member, effects)| (network, member, *effects))
        })
        .collect();
    for (network, member, effects) in attachments {
        planned.push(PlannedLink {
            spec: LinkSpec {
                node1: member,
                iface1: None,
                node2: network,
                iface2: None,
            },
            effects,
            remote: None,
        });
    }

    Ok(planned)
}

fn server_of(session: &Session, node: u32) -> String {
    session
        .topology
        .node(node)
        .map(|n| n.server.clone())
        .unwrap_or_default()
}
