//! Per-connection reader and writer tasks, and the Host-side record.
//!
//! Each TCP connection is split into a reader task and a writer task. The
//! reader decodes frames and forwards every message to Host; the writer
//! drains the connection's private byte queue. Host owns the queue sender:
//! dropping it on unregister is the only teardown signal. The writer then
//! shuts the socket down and stops the reader.

use bytes::Bytes;
use futures::StreamExt;
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::codec::FramedRead;

use trustline_core::{Message, MessageKind, Trustline};

use crate::error::P2pResult;
use crate::host::HostSender;
use crate::peer::{ConnectionDirection, ConnectionId, ConnectionInfo, ConnectionState};
use crate::protocol::MessageCodec;

/// Host's record of one connection.
#[derive(Debug)]
pub struct Connection {
    info: ConnectionInfo,
    state: ConnectionState,
    trustline: Option<Trustline>,
    outbound: mpsc::UnboundedSender<Bytes>,
}

impl Connection {
    /// Create a record for a freshly registered connection.
    pub fn new(info: ConnectionInfo, outbound: mpsc::UnboundedSender<Bytes>) -> Self {
        Self {
            info,
            state: ConnectionState::Connecting,
            trustline: None,
            outbound,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.info.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.info.addr
    }

    pub fn direction(&self) -> ConnectionDirection {
        self.info.direction
    }

    /// Peer ID, empty until the peer has been identified.
    pub fn peer_id(&self) -> Option<&str> {
        self.info.peer_id.as_deref()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn is_pending(&self) -> bool {
        self.state.is_pending()
    }

    /// Trustline, present once the connection is Active.
    pub fn trustline(&self) -> Option<&Trustline> {
        self.trustline.as_ref()
    }

    pub fn trustline_mut(&mut self) -> Option<&mut Trustline> {
        self.trustline.as_mut()
    }

    pub(crate) fn set_peer_id(&mut self, peer_id: String) {
        self.info.peer_id = Some(peer_id);
    }

    /// Move to `next` if the transition is legal. Returns whether it happened.
    pub fn transition_to(&mut self, next: ConnectionState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                conn = %self.info.id,
                from = %self.state,
                to = %next,
                "Refusing illegal connection state transition"
            );
            return false;
        }

        tracing::debug!(
            conn = %self.info.id,
            from = %self.state,
            to = %next,
            "Connection state transition"
        );
        self.state = next;
        true
    }

    /// Create a zeroed trustline and move to Active.
    pub fn open_trustline(&mut self, limit: u64) -> bool {
        if !self.transition_to(ConnectionState::Active) {
            return false;
        }
        self.trustline = Some(Trustline::new(limit));
        true
    }

    /// Whether the writer is still draining the outbound queue.
    pub fn is_writable(&self) -> bool {
        !self.outbound.is_closed()
    }

    /// Queue an encoded frame for the writer. Returns false if the writer is gone.
    pub fn send(&self, frame: Bytes) -> bool {
        self.outbound.send(frame).is_ok()
    }
}

/// Handles to the tasks serving one connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Connection handle as known to Host.
    pub id: ConnectionId,
    /// Writer task; finishes once the socket is shut down.
    pub writer: JoinHandle<()>,
    /// Reader task, aborted by the writer on teardown.
    pub reader: AbortHandle,
}

/// Register a connection with Host and spawn its reader and writer tasks.
///
/// Register is pushed before the reader starts, so Host always sees the
/// connection before any of its messages.
pub async fn spawn_connection(
    info: ConnectionInfo,
    stream: TcpStream,
    host: HostSender,
) -> P2pResult<ConnectionHandle> {
    let id = info.id;
    let (read_half, write_half) = stream.into_split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    host.register(info, outbound_tx).await?;

    let frames = FramedRead::new(read_half, MessageCodec::new());
    let reader = tokio::spawn(read_loop(id, frames, host.clone()));
    let reader_abort = reader.abort_handle();
    let writer = tokio::spawn(write_loop(id, write_half, outbound_rx, reader_abort.clone(), host));

    Ok(ConnectionHandle {
        id,
        writer,
        reader: reader_abort,
    })
}

async fn read_loop(
    id: ConnectionId,
    mut frames: FramedRead<OwnedReadHalf, MessageCodec>,
    host: HostSender,
) {
    loop {
        match frames.next().await {
            Some(Ok(message)) => {
                tracing::trace!(conn = %id, msg = %message, "Received message");
                if forward(id, message, &host).await.is_err() {
                    // Host is gone; nobody left to unregister with.
                    return;
                }
            }
            Some(Err(e)) => {
                tracing::warn!(conn = %id, error = %e, "Failed to read frame, dropping connection");
                break;
            }
            None => {
                tracing::debug!(conn = %id, "Connection closed by peer");
                break;
            }
        }
    }

    let _ = host.unregister(id).await;
}

/// Classify a decoded message: proposals go to negotiation, the rest to inbound.
async fn forward(id: ConnectionId, message: Message, host: &HostSender) -> P2pResult<()> {
    match message.kind {
        MessageKind::Propose => host.proposal(id, message).await,
        _ => host.inbound(id, message).await,
    }
}

async fn write_loop(
    id: ConnectionId,
    mut socket: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<Bytes>,
    reader: AbortHandle,
    host: HostSender,
) {
    while let Some(frame) = queue.recv().await {
        if let Err(e) = socket.write_all(&frame).await {
            tracing::warn!(conn = %id, error = %e, "Failed to write frame, dropping connection");
            let _ = host.unregister(id).await;
            break;
        }
    }

    if let Err(e) = socket.shutdown().await {
        tracing::debug!(conn = %id, error = %e, "Socket shutdown failed");
    }
    reader.abort();

    tracing::debug!(conn = %id, "Connection writer stopped");
}
