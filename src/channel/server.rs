//! TCP listener and per-peer channel tasks.
//!
//! One read task and one write task per accepted connection. The read
//! task frames bytes through a [`MessageDecoder`] and forwards decoded
//! messages to the dispatcher through a single inbound queue. Fatal
//! wire errors (desync, backlog overflow) close the channel after a
//! best-effort Fatal exception to the peer; per-message errors are
//! reported back to the peer and the channel keeps running.

use super::{ChannelError, PeerId, PeerTable};
use crate::messages::{ExceptionLevel, ExceptionMessage, Message};
use crate::wire::{DecodeOutcome, MessageDecoder, MessageFlags};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

const READ_BUF_SIZE: usize = 16 * 1024;

/// What a peer channel reports to the dispatcher.
#[derive(Debug)]
pub enum InboundEvent {
    /// A channel was accepted.
    Connected(PeerId),
    /// A complete, typed message arrived.
    Message {
        peer: PeerId,
        flags: MessageFlags,
        message: Message,
    },
    /// A channel closed, cleanly or not.
    Disconnected(PeerId),
}

/// Accept connections forever, spawning channel tasks per peer.
pub async fn serve(
    listener: TcpListener,
    table: Arc<Mutex<PeerTable>>,
    events: mpsc::Sender<InboundEvent>,
    max_backlog: usize,
) -> Result<(), ChannelError> {
    let local = listener.local_addr()?;
    info!(addr = %local, "Listening for control channels");

    loop {
        let (stream, addr) = listener.accept().await?;
        stream.set_nodelay(true).ok();

        let (peer, outbound) = table.lock().await.register(addr);
        if events.send(InboundEvent::Connected(peer)).await.is_err() {
            // Dispatcher is gone; stop accepting.
            return Ok(());
        }
        tokio::spawn(run_channel(
            stream,
            peer,
            outbound,
            Arc::clone(&table),
            events.clone(),
            max_backlog,
        ));
    }
}

async fn run_channel(
    stream: TcpStream,
    peer: PeerId,
    outbound: mpsc::Receiver<Vec<u8>>,
    table: Arc<Mutex<PeerTable>>,
    events: mpsc::Sender<InboundEvent>,
    max_backlog: usize,
) {
    let (read_half, write_half) = stream.into_split();
    let writer = tokio::spawn(write_loop(peer, write_half, outbound));

    if let Err(err) = read_loop(peer, read_half, &table, &events, max_backlog).await {
        debug!(peer = %peer, error = %err, "Channel read loop ended");
    }

    table.lock().await.remove(peer);
    events.send(InboundEvent::Disconnected(peer)).await.ok();
    // Dropping the table entry drops the send half; the writer drains
    // what is already queued and exits.
    writer.await.ok();
}

async fn write_loop(peer: PeerId, mut half: OwnedWriteHalf, mut outbound: mpsc::Receiver<Vec<u8>>) {
    while let Some(bytes) = outbound.recv().await {
        if let Err(err) = half.write_all(&bytes).await {
            warn!(peer = %peer, error = %err, "Channel write failed");
            break;
        }
    }
    half.shutdown().await.ok();
}

async fn read_loop(
    peer: PeerId,
    mut half: OwnedReadHalf,
    table: &Arc<Mutex<PeerTable>>,
    events: &mpsc::Sender<InboundEvent>,
    max_backlog: usize,
) -> Result<(), ChannelError> {
    let mut decoder = MessageDecoder::new(max_backlog);
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        let n = half.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }

        if let Err(err) = decoder.feed(&buf[..n]) {
            // Backlog overflow is fatal by construction.
            error!(peer = %peer, error = %err, "Channel backlog overflow, closing");
            report_exception(peer, table, ExceptionLevel::Fatal, &err.to_string()).await;
            return Err(err.into());
        }

        loop {
            match decoder.next_message() {
                Ok(DecodeOutcome::NeedMoreData) => break,
                Ok(DecodeOutcome::Message(raw)) => match Message::decode(&raw) {
                    Ok(decoded) => {
                        for tlv in &decoded.ignored_tlvs {
                            warn!(peer = %peer, tlv_type = format!("0x{:02x}", tlv),
                                "Ignoring unknown TLV");
                        }
                        if events
                            .send(InboundEvent::Message {
                                peer,
                                flags: raw.flags,
                                message: decoded.message,
                            })
                            .await
                            .is_err()
                        {
                            return Ok(());
                        }
                    }
                    Err(err) => {
                        // Per-message TLV error: drop this message only.
                        warn!(peer = %peer, error = %err, "Discarding undecodable message");
                        report_exception(peer, table, ExceptionLevel::Error, &err.to_string())
                            .await;
                    }
                },
                Err(err) if err.is_fatal() => {
                    error!(peer = %peer, error = %err, "Channel desynchronized, closing");
                    report_exception(peer, table, ExceptionLevel::Fatal, &err.to_string()).await;
                    return Err(err.into());
                }
                Err(err) => {
                    // Unknown type or bad flags: the frame was consumed,
                    // parsing resumes at the next message boundary.
                    warn!(peer = %peer, error = %err, "Discarding unrecognized message");
                    report_exception(peer, table, ExceptionLevel::Error, &err.to_string()).await;
                }
            }
        }
    }
}

/// Best-effort exception report back to the offending peer.
async fn report_exception(
    peer: PeerId,
    table: &Arc<Mutex<PeerTable>>,
    level: ExceptionLevel,
    text: &str,
) {
    let msg = Message::Exception(ExceptionMessage::new(level, "channel", text.to_string()));
    let Ok(bytes) = msg.encode(MessageFlags::modify()) else {
        return;
    };
    table.lock().await.send_to(peer, bytes).ok();
}
