//! Per-message-kind request handlers.
//!
//! Every handler follows the same discipline: resolve the target
//! session, mutate the model under that session's lock, and broadcast
//! the committed change to the session's other peers only after the
//! lock is released. Failed requests never broadcast.

use super::{Daemon, DaemonError};
use crate::channel::{PeerId, PeerRole};
use crate::exec::ExecPurpose;
use crate::messages::{
    ConfigFlag, ConfigureMessage, EventMessage, ExceptionMessage, ExecuteMessage, FileMessage,
    IfaceTlvs, LinkMessage, Message, NodeMessage, RegisterMessage, SessionMessage,
};
use crate::model::{InterfaceParams, LinkOp, LinkParams, NodeParams};
use crate::session::{EventKind, FileEntry, SessionError, SessionState};
use crate::wire::{MessageFlags, MessageOp, WireError};
use tracing::{debug, info, warn};

/// Default prefix lengths applied when an address arrives without one.
const DEFAULT_IP4_PREFIX: u16 = 24;
const DEFAULT_IP6_PREFIX: u16 = 64;

fn split_list(s: &str) -> Vec<String> {
    s.split('|')
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_ids(s: &str) -> Vec<u32> {
    s.split('|').filter_map(|part| part.parse().ok()).collect()
}

fn iface_params(tlvs: &IfaceTlvs) -> InterfaceParams {
    InterfaceParams {
        index: tlvs.index.map(u32::from),
        ip4: tlvs
            .ip4
            .map(|addr| (addr, tlvs.ip4_prefix.unwrap_or(DEFAULT_IP4_PREFIX))),
        ip6: tlvs
            .ip6
            .map(|addr| (addr, tlvs.ip6_prefix.unwrap_or(DEFAULT_IP6_PREFIX))),
        mac: tlvs.mac,
    }
}

impl Daemon {
    /// Dispatch one inbound message. The match is exhaustive: adding a
    /// message kind without a handler is a compile error.
    pub(crate) async fn handle_message(
        &self,
        peer: PeerId,
        flags: MessageFlags,
        message: Message,
    ) -> Result<(), DaemonError> {
        match message {
            Message::Node(m) => self.handle_node(peer, flags, m).await,
            Message::Link(m) => self.handle_link(peer, flags, m).await,
            Message::Execute(m) => self.handle_execute(peer, flags, m).await,
            Message::Register(m) => self.handle_register(peer, m).await,
            Message::Configure(m) => self.handle_configure(peer, m).await,
            Message::File(m) => self.handle_file(peer, m).await,
            Message::Event(m) => self.handle_event_msg(peer, m).await,
            Message::Session(m) => self.handle_session(peer, flags, m).await,
            Message::Exception(m) => self.handle_exception(peer, m).await,
        }
    }

    // ------------------------------------------------------------------
    // Node
    // ------------------------------------------------------------------

    async fn handle_node(
        &self,
        peer: PeerId,
        flags: MessageFlags,
        msg: NodeMessage,
    ) -> Result<(), DaemonError> {
        let (id, session) = self.target_session(peer, msg.session).await?;

        let iface = (msg.ip4.is_some() || msg.ip6.is_some() || msg.mac.is_some()).then(|| {
            InterfaceParams {
                index: None,
                ip4: msg
                    .ip4
                    .map(|addr| (addr, msg.ip4_prefix.unwrap_or(DEFAULT_IP4_PREFIX))),
                ip6: msg
                    .ip6
                    .map(|addr| (addr, msg.ip6_prefix.unwrap_or(DEFAULT_IP6_PREFIX))),
                mac: msg.mac,
            }
        });
        let params = NodeParams {
            id: msg.number,
            node_type: msg.node_type,
            name: msg.name.clone(),
            server: msg.server.clone(),
            services: msg.services.as_deref().map(split_list),
            position: msg.position,
            iface,
        };

        {
            let mut session = session.lock().await;
            match flags.op {
                MessageOp::Add => {
                    session
                        .topology
                        .add_node(params)
                        .map_err(SessionError::from)?;
                    info!(session = id, node = msg.number, "Node added");
                }
                MessageOp::Modify => {
                    session
                        .topology
                        .modify_node(params)
                        .map_err(SessionError::from)?;
                    debug!(session = id, node = msg.number, "Node modified");
                }
                MessageOp::Delete => {
                    session
                        .topology
                        .delete_node(msg.number)
                        .map_err(SessionError::from)?;
                    info!(session = id, node = msg.number, "Node deleted");
                }
            }
        }

        // Local-only requests are not propagated to other peers.
        if !flags.local {
            self.broadcast(id, flags, &Message::Node(msg), Some(peer))
                .await;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Link
    // ------------------------------------------------------------------

    async fn handle_link(
        &self,
        peer: PeerId,
        flags: MessageFlags,
        msg: LinkMessage,
    ) -> Result<(), DaemonError> {
        let (id, session) = self.target_session(peer, msg.session).await?;

        let params = LinkParams {
            node1: msg.node1,
            node2: msg.node2,
            iface1: msg.iface1.as_ref().map(iface_params),
            iface2: msg.iface2.as_ref().map(iface_params),
            effects: msg.effects(),
            unidirectional: flags.unidirectional,
            key: msg.key,
        };

        let outcome = {
            let mut session = session.lock().await;
            session
                .topology
                .apply_link(LinkOp::from(flags.op), params)
                .map_err(SessionError::from)?
        };
        debug!(
            session = id,
            node1 = msg.node1,
            node2 = msg.node2,
            ?outcome,
            "Link request resolved"
        );

        if !flags.local {
            self.broadcast(id, flags, &Message::Link(msg), Some(peer))
                .await;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Execute
    // ------------------------------------------------------------------

    async fn handle_execute(
        &self,
        peer: PeerId,
        flags: MessageFlags,
        msg: ExecuteMessage,
    ) -> Result<(), DaemonError> {
        let (id, session) = self.target_session(peer, msg.session).await?;

        let is_completion = msg.result.is_some() || msg.status.is_some();
        if is_completion {
            let pending = {
                let mut session = session.lock().await;
                session.exec.complete(msg.exec_num)
            };
            if pending.is_some() {
                // Forward the result to the session's controllers.
                self.broadcast(id, flags, &Message::Execute(msg), Some(peer))
                    .await;
            }
            return Ok(());
        }

        let command = msg.command.clone().ok_or(WireError::MissingTlv {
            message: "execute",
            tlv_type: crate::messages::execute::TLV_COMMAND,
        })?;
        // Shell requests are flagged local; periodic observers carry a
        // repeat time; everything else is a one-shot with a result.
        let purpose = if flags.local {
            ExecPurpose::Shell
        } else if msg.time.is_some() {
            ExecPurpose::Widget
        } else {
            ExecPurpose::OneShot
        };

        let exec_num = {
            let mut session = session.lock().await;
            session.exec.submit(purpose, msg.node, command.clone())
        };

        // Acknowledge with the assigned execution number so the
        // requester can correlate the eventual result.
        let ack = ExecuteMessage {
            node: msg.node,
            exec_num,
            time: msg.time,
            command: Some(command),
            result: None,
            status: None,
            session: Some(id),
        };
        self.send_message(peer, flags, &Message::Execute(ack)).await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Register
    // ------------------------------------------------------------------

    async fn handle_register(&self, peer: PeerId, msg: RegisterMessage) -> Result<(), DaemonError> {
        if msg.exec_server.is_some() || msg.emulation_server.is_some() {
            self.peers()
                .lock()
                .await
                .set_role(peer, PeerRole::PeerDaemon)?;
        }

        if let Some(sessions) = &msg.session {
            for sid in parse_ids(sessions) {
                // Validate before subscribing.
                self.registry().lock().await.get(sid)?;
                self.peers().lock().await.join_session(peer, sid)?;
                info!(peer = %peer, session = sid, "Peer joined session");
            }
        }

        // Every registration gets the current session listing back.
        let listing = self.session_listing().await;
        self.send_message(peer, MessageFlags::modify(), &Message::Session(listing))
            .await;
        Ok(())
    }

    async fn session_listing(&self) -> SessionMessage {
        let infos = self.registry().lock().await.list().await;
        if infos.is_empty() {
            return SessionMessage::default();
        }
        let join = |f: &dyn Fn(&crate::session::SessionInfo) -> String| {
            infos.iter().map(|i| f(i)).collect::<Vec<_>>().join("|")
        };
        SessionMessage {
            numbers: Some(join(&|i| i.id.to_string())),
            names: Some(join(&|i| i.name.clone().unwrap_or_default())),
            files: Some(join(&|i| i.file.clone().unwrap_or_default())),
            node_counts: Some(join(&|i| i.node_count.to_string())),
            date: None,
            user: None,
        }
    }

    // ------------------------------------------------------------------
    // Configure
    // ------------------------------------------------------------------

    async fn handle_configure(
        &self,
        peer: PeerId,
        msg: ConfigureMessage,
    ) -> Result<(), DaemonError> {
        let (id, session) = self.target_session(peer, msg.session).await?;
        let object = msg.object.clone().unwrap_or_else(|| "session".to_string());
        // Session options are stored bare; other objects (wireless
        // models, service parameters) are namespaced by object name.
        let prefix = if object == "session" {
            String::new()
        } else {
            format!("{}.", object)
        };

        match msg.config_flags.unwrap_or(ConfigFlag::Request) {
            ConfigFlag::Update => {
                let values = msg.values.as_deref().unwrap_or_default();
                let mut session = session.lock().await;
                for pair in values.split('|').filter(|p| !p.is_empty()) {
                    match pair.split_once('=') {
                        Some((key, value)) => {
                            session.set_option(&format!("{}{}", prefix, key), value);
                        }
                        None => warn!(session = id, pair, "Ignoring malformed config value"),
                    }
                }
                debug!(session = id, object, "Configuration updated");
            }
            ConfigFlag::Request => {
                let session = session.lock().await;
                let values: Vec<String> = session
                    .options
                    .iter()
                    .filter(|(k, _)| k.starts_with(&prefix))
                    .map(|(k, v)| format!("{}={}", &k[prefix.len()..], v))
                    .collect();
                let reply = ConfigureMessage {
                    object: Some(object),
                    config_flags: Some(ConfigFlag::Update),
                    data_types: None,
                    values: (!values.is_empty()).then(|| values.join("|")),
                    captions: None,
                    session: Some(id),
                    node: msg.node,
                };
                drop(session);
                self.send_message(peer, MessageFlags::modify(), &Message::Configure(reply))
                    .await;
            }
            ConfigFlag::Reset => {
                let mut session = session.lock().await;
                session.options.retain(|k, _| !k.starts_with(&prefix));
                info!(session = id, object, "Configuration reset");
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // File
    // ------------------------------------------------------------------

    async fn handle_file(&self, peer: PeerId, msg: FileMessage) -> Result<(), DaemonError> {
        let (id, session) = self.target_session(peer, msg.session).await?;
        let name = msg.name.clone().ok_or(WireError::MissingTlv {
            message: "file",
            tlv_type: crate::messages::control::FILE_TLV_NAME,
        })?;

        // Hook scripts arrive as files typed "hook:<state-code>".
        if let Some(code) = msg
            .file_type
            .as_deref()
            .and_then(|t| t.strip_prefix("hook:"))
        {
            let state = code
                .parse::<u32>()
                .ok()
                .and_then(SessionState::from_code)
                .ok_or_else(|| SessionError::NotFound(id))?;
            let body = msg.data.clone().unwrap_or_default();
            let mut session = session.lock().await;
            session.add_hook(state, &name, &body);
            info!(session = id, hook = %name, %state, "Hook registered");
            return Ok(());
        }

        let entry = FileEntry {
            node: msg.node,
            name: name.clone(),
            mode: msg.mode.clone(),
            service: msg
                .file_type
                .as_deref()
                .and_then(|t| t.strip_prefix("service:"))
                .map(str::to_string),
            source: msg.source.clone(),
            data: msg.data.clone(),
        };
        let mut session = session.lock().await;
        // Replace an earlier push of the same file for the same node.
        session
            .custom_files
            .retain(|f| !(f.node == entry.node && f.name == entry.name));
        session.custom_files.push(entry);
        debug!(session = id, file = %name, "Custom file stored");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Event
    // ------------------------------------------------------------------

    async fn handle_event_msg(&self, peer: PeerId, msg: EventMessage) -> Result<(), DaemonError> {
        let (id, session) = self.target_session(peer, msg.session).await?;

        match msg.event_type {
            EventKind::State(target) => {
                self.run_transition(peer, id, &session, target).await?;
            }
            EventKind::FileOpen | EventKind::FileSave => {
                {
                    let mut session = session.lock().await;
                    session.file = msg.name.clone();
                }
                self.broadcast(id, MessageFlags::modify(), &Message::Event(msg), Some(peer))
                    .await;
            }
            EventKind::Start | EventKind::Stop | EventKind::Pause | EventKind::Restart => {
                // Scheduler sub-events are fanned out to the session's
                // peers; the engine does not interpret them.
                info!(session = id, event = %msg.event_type, "Scheduler event");
                self.broadcast(id, MessageFlags::modify(), &Message::Event(msg), Some(peer))
                    .await;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------

    async fn handle_session(
        &self,
        peer: PeerId,
        flags: MessageFlags,
        msg: SessionMessage,
    ) -> Result<(), DaemonError> {
        match flags.op {
            MessageOp::Add => {
                let (id, session) = self.create_session(peer).await;
                {
                    let mut session = session.lock().await;
                    session.name = msg.names.as_deref().map(str::to_string);
                    session.user = msg.user.as_deref().map(str::to_string);
                }
                let reply = SessionMessage {
                    numbers: Some(id.to_string()),
                    ..SessionMessage::default()
                };
                self.send_message(peer, MessageFlags::add(), &Message::Session(reply))
                    .await;
            }
            MessageOp::Delete => {
                for sid in parse_ids(msg.numbers.as_deref().unwrap_or_default()) {
                    let session = self.registry().lock().await.get(sid)?;
                    // Shutdown tears down anything provisioned before
                    // the session is forgotten.
                    self.run_transition(peer, sid, &session, SessionState::Shutdown)
                        .await?;
                    self.registry().lock().await.destroy(sid)?;
                }
            }
            MessageOp::Modify => {
                let ids = parse_ids(msg.numbers.as_deref().unwrap_or_default());
                if ids.is_empty() {
                    let listing = self.session_listing().await;
                    self.send_message(peer, MessageFlags::modify(), &Message::Session(listing))
                        .await;
                } else {
                    for sid in ids {
                        self.registry().lock().await.get(sid)?;
                        self.peers().lock().await.join_session(peer, sid)?;
                        info!(peer = %peer, session = sid, "Peer joined session");
                    }
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Exception
    // ------------------------------------------------------------------

    async fn handle_exception(&self, peer: PeerId, msg: ExceptionMessage) -> Result<(), DaemonError> {
        warn!(
            peer = %peer,
            level = %msg.level,
            source = msg.source.as_deref().unwrap_or(""),
            text = msg.text.as_deref().unwrap_or(""),
            "Exception reported by peer"
        );
        // Relay peer-daemon exceptions to the session's controllers.
        if let Some(sid) = msg.session {
            self.broadcast(sid, MessageFlags::modify(), &Message::Exception(msg), Some(peer))
                .await;
        }
        Ok(())
    }
}
