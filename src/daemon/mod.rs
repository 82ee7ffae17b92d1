//! Orchestration Engine
//!
//! Owns the session registry and the peer table, consumes the inbound
//! event queue fed by the channel layer, and dispatches each typed
//! message to its handler. Topology mutations happen under the owning
//! session's lock; provisioning work happens outside any lock so slow
//! collaborators never stall unrelated sessions.

mod deploy;
mod handlers;

pub use deploy::DeployReport;

use crate::channel::{ChannelError, InboundEvent, PeerId, PeerTable};
use crate::config::Config;
use crate::messages::{ExceptionLevel, ExceptionMessage, Message};
use crate::provision::{HookRunner, NodeHandle, Provisioner, ServiceRegistry};
use crate::session::{Session, SessionError, SessionRegistry};
use crate::wire::{MessageFlags, WireError};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

/// Depth of the inbound event queue shared by all channels.
const EVENT_QUEUE_DEPTH: usize = 1024;

/// Errors related to daemon operation.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The daemon: session registry, peer table, and collaborators.
pub struct Daemon {
    registry: Mutex<SessionRegistry>,
    peers: Arc<Mutex<PeerTable>>,
    provisioner: Arc<dyn Provisioner>,
    services: Arc<dyn ServiceRegistry>,
    hook_runner: Arc<dyn HookRunner>,
    config: Config,
    /// Provisioned node handles per session, kept for teardown.
    handles: Mutex<HashMap<u32, HashMap<u32, NodeHandle>>>,
}

impl Daemon {
    /// Build a daemon from configuration and collaborators.
    pub fn new(
        config: Config,
        provisioner: Arc<dyn Provisioner>,
        services: Arc<dyn ServiceRegistry>,
        hook_runner: Arc<dyn HookRunner>,
    ) -> Result<Arc<Self>, crate::config::ConfigError> {
        let mac_seed = config.daemon.mac_seed()?;
        Ok(Arc::new(Self {
            registry: Mutex::new(SessionRegistry::new(mac_seed)),
            peers: Arc::new(Mutex::new(PeerTable::default())),
            provisioner,
            services,
            hook_runner,
            config,
            handles: Mutex::new(HashMap::new()),
        }))
    }

    /// Bind the control listener and process events until the channel
    /// layer shuts down.
    pub async fn run(self: Arc<Self>) -> Result<(), DaemonError> {
        let listener = TcpListener::bind(self.config.daemon.bind_addr()).await?;
        self.run_with_listener(listener).await
    }

    /// Like [`Daemon::run`] with a caller-supplied listener (tests bind
    /// to an ephemeral port).
    pub async fn run_with_listener(
        self: Arc<Self>,
        listener: TcpListener,
    ) -> Result<(), DaemonError> {
        let (tx, mut rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let max_backlog = self
            .config
            .daemon
            .max_backlog
            .unwrap_or(crate::wire::DEFAULT_MAX_BACKLOG);
        let accept = tokio::spawn(crate::channel::serve(
            listener,
            Arc::clone(&self.peers),
            tx,
            max_backlog,
        ));

        while let Some(event) = rx.recv().await {
            self.handle_event(event).await;
        }

        accept.abort();
        Ok(())
    }

    async fn handle_event(&self, event: InboundEvent) {
        match event {
            InboundEvent::Connected(peer) => {
                debug!(peer = %peer, "Channel connected");
            }
            InboundEvent::Disconnected(peer) => {
                debug!(peer = %peer, "Channel disconnected");
            }
            InboundEvent::Message {
                peer,
                flags,
                message,
            } => {
                if let Err(err) = self.handle_message(peer, flags, message).await {
                    warn!(peer = %peer, error = %err, "Request failed");
                    self.send_exception(
                        peer,
                        ExceptionMessage::new(ExceptionLevel::Error, "daemon", err.to_string()),
                    )
                    .await;
                }
            }
        }
    }

    /// Create a session, seed its server map from static configuration,
    /// and subscribe the creating peer.
    pub(crate) async fn create_session(&self, peer: PeerId) -> (u32, Arc<Mutex<Session>>) {
        let (id, handle) = self.registry.lock().await.create();
        {
            let mut session = handle.lock().await;
            for server in &self.config.servers {
                session.coordinator.servers.assign(
                    &server.name,
                    &server.host,
                    server.port.unwrap_or(crate::config::DEFAULT_PORT),
                );
            }
        }
        self.peers.lock().await.join_session(peer, id).ok();
        (id, handle)
    }

    /// Resolve the session a request addresses: the explicit session
    /// TLV when present, otherwise the first session the peer joined.
    pub(crate) async fn target_session(
        &self,
        peer: PeerId,
        explicit: Option<u32>,
    ) -> Result<(u32, Arc<Mutex<Session>>), DaemonError> {
        let id = match explicit {
            Some(id) => id,
            None => {
                let table = self.peers.lock().await;
                let handle = table
                    .get(peer)
                    .ok_or(ChannelError::PeerNotFound(peer))?;
                *handle
                    .sessions
                    .iter()
                    .next()
                    .ok_or(SessionError::NotFound(0))?
            }
        };
        let session = self.registry.lock().await.get(id)?;
        Ok((id, session))
    }

    /// Send one message to one peer, dropping the channel if its queue
    /// is stuck.
    pub(crate) async fn send_message(&self, peer: PeerId, flags: MessageFlags, message: &Message) {
        let bytes = match message.encode(flags) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(peer = %peer, error = %err, "Failed to encode outbound message");
                return;
            }
        };
        let mut table = self.peers.lock().await;
        match table.send_to(peer, bytes) {
            Ok(()) => {}
            Err(ChannelError::PeerNotFound(_)) => {}
            Err(err) => {
                warn!(peer = %peer, error = %err, "Dropping unresponsive peer");
                table.remove(peer);
            }
        }
    }

    /// Fan a committed state change out to every peer subscribed to the
    /// session, except the originator.
    pub(crate) async fn broadcast(
        &self,
        session: u32,
        flags: MessageFlags,
        message: &Message,
        except: Option<PeerId>,
    ) {
        let bytes = match message.encode(flags) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(session, error = %err, "Failed to encode broadcast");
                return;
            }
        };
        let mut table = self.peers.lock().await;
        for stuck in table.broadcast_session(session, &bytes, except) {
            warn!(peer = %stuck, session, "Dropping unresponsive peer");
            table.remove(stuck);
        }
    }

    pub(crate) async fn send_exception(&self, peer: PeerId, exception: ExceptionMessage) {
        self.send_message(peer, MessageFlags::modify(), &Message::Exception(exception))
            .await;
    }

    /// Report a deployment-scoped exception to the session's peers.
    pub(crate) async fn broadcast_exception(&self, session: u32, exception: ExceptionMessage) {
        info!(
            session,
            level = %exception.level,
            text = exception.text.as_deref().unwrap_or(""),
            "Exception raised"
        );
        self.broadcast(
            session,
            MessageFlags::modify(),
            &Message::Exception(exception.with_session(session)),
            None,
        )
        .await;
    }

    pub(crate) fn provisioner(&self) -> &dyn Provisioner {
        &*self.provisioner
    }

    pub(crate) fn services(&self) -> &dyn ServiceRegistry {
        &*self.services
    }

    pub(crate) fn hook_runner(&self) -> &dyn HookRunner {
        &*self.hook_runner
    }

    pub(crate) fn peers(&self) -> &Arc<Mutex<PeerTable>> {
        &self.peers
    }

    pub(crate) fn registry(&self) -> &Mutex<SessionRegistry> {
        &self.registry
    }

    pub(crate) fn handles(&self) -> &Mutex<HashMap<u32, HashMap<u32, NodeHandle>>> {
        &self.handles
    }
}
