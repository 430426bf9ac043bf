//! Host events and the connection-side sender.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use trustline_core::Message;

use crate::config::EVENT_QUEUE_CAPACITY;
use crate::error::{HostResult, P2pError, P2pResult};
use crate::host::split::PaymentStep;
use crate::host::{HostSnapshot, SettleReport};
use crate::peer::{ConnectionId, ConnectionInfo};

/// Everything Host reacts to, delivered over a single ordered queue.
///
/// The first six variants come from connection tasks; the rest are
/// operator requests carrying a reply channel.
#[derive(Debug)]
pub enum HostEvent {
    /// A new connection with its outbound byte queue.
    Register {
        info: ConnectionInfo,
        outbound: mpsc::UnboundedSender<Bytes>,
    },
    /// Connection is gone (read/write failure, EOF).
    Unregister(ConnectionId),
    /// Dialing a peer failed before any connection was registered.
    DialFailed {
        conn: ConnectionId,
        peer_id: String,
        reason: String,
    },
    /// A `Propose` read from a connection.
    Proposal { conn: ConnectionId, message: Message },
    /// Any other message read from a connection.
    Inbound { conn: ConnectionId, message: Message },
    /// Send a message as-is to the peer it addresses.
    Outbound {
        message: Message,
        response_tx: oneshot::Sender<HostResult<()>>,
    },
    /// Pay a peer, splitting over-limit amounts.
    Pay {
        peer_id: String,
        amount: u64,
        response_tx: oneshot::Sender<HostResult<Vec<PaymentStep>>>,
    },
    /// Settle debt with a peer through the ledger.
    Settle {
        peer_id: String,
        amount: u64,
        response_tx: oneshot::Sender<HostResult<()>>,
    },
    /// Dial a peer and propose a trustline.
    Propose {
        peer_id: String,
        addr: SocketAddr,
        response_tx: oneshot::Sender<HostResult<ConnectionId>>,
    },
    /// Resolve the oldest pending proposal.
    Decide {
        accept: bool,
        response_tx: oneshot::Sender<HostResult<String>>,
    },
    /// Settle all outstanding debt.
    SettleAll {
        response_tx: oneshot::Sender<SettleReport>,
    },
    /// Report current state.
    Snapshot {
        response_tx: oneshot::Sender<HostSnapshot>,
    },
    /// Close every connection and stop the loop.
    Shutdown,
}

/// Narrow capability handed to connection tasks.
///
/// Only the connection-side events can be pushed through it.
#[derive(Debug, Clone)]
pub struct HostSender {
    events: mpsc::Sender<HostEvent>,
    next_id: Arc<AtomicU64>,
}

impl HostSender {
    /// Create the Host event queue.
    pub fn channel() -> (Self, mpsc::Receiver<HostEvent>) {
        let (events, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let sender = Self {
            events,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (sender, events_rx)
    }

    /// Allocate a fresh connection ID.
    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub async fn register(
        &self,
        info: ConnectionInfo,
        outbound: mpsc::UnboundedSender<Bytes>,
    ) -> P2pResult<()> {
        self.push(HostEvent::Register { info, outbound }).await
    }

    pub async fn unregister(&self, conn: ConnectionId) -> P2pResult<()> {
        self.push(HostEvent::Unregister(conn)).await
    }

    pub async fn dial_failed(&self, conn: ConnectionId, peer_id: String, reason: String) -> P2pResult<()> {
        self.push(HostEvent::DialFailed {
            conn,
            peer_id,
            reason,
        })
        .await
    }

    pub async fn proposal(&self, conn: ConnectionId, message: Message) -> P2pResult<()> {
        self.push(HostEvent::Proposal { conn, message }).await
    }

    pub async fn inbound(&self, conn: ConnectionId, message: Message) -> P2pResult<()> {
        self.push(HostEvent::Inbound { conn, message }).await
    }

    async fn push(&self, event: HostEvent) -> P2pResult<()> {
        self.events.send(event).await.map_err(|_| P2pError::Shutdown)
    }

    pub(crate) fn events(&self) -> &mpsc::Sender<HostEvent> {
        &self.events
    }
}
