//! Cloneable handle for driving the Host from the command surface.

use std::net::SocketAddr;

use tokio::sync::oneshot;

use trustline_core::Message;

use crate::error::{HostError, HostResult};
use crate::host::event::{HostEvent, HostSender};
use crate::host::split::PaymentStep;
use crate::host::{HostSnapshot, SettleReport};
use crate::peer::ConnectionId;

/// Cloneable handle that pushes operator requests onto the Host queue.
#[derive(Debug, Clone)]
pub struct HostHandle {
    sender: HostSender,
}

impl HostHandle {
    /// Create a new handle from the Host sender.
    pub fn new(sender: HostSender) -> Self {
        Self { sender }
    }

    /// Connection-side capability for the same Host.
    pub fn host_sender(&self) -> HostSender {
        self.sender.clone()
    }

    /// Pay a peer. Over-limit amounts are split; returns the applied steps.
    pub async fn pay(&self, peer_id: impl Into<String>, amount: u64) -> HostResult<Vec<PaymentStep>> {
        let peer_id = peer_id.into();
        self.request(|response_tx| HostEvent::Pay {
            peer_id,
            amount,
            response_tx,
        })
        .await?
    }

    /// Settle `amount` of our debt with a peer through the ledger.
    pub async fn settle(&self, peer_id: impl Into<String>, amount: u64) -> HostResult<()> {
        let peer_id = peer_id.into();
        self.request(|response_tx| HostEvent::Settle {
            peer_id,
            amount,
            response_tx,
        })
        .await?
    }

    /// Dial `addr` and propose a trustline to `peer_id`.
    ///
    /// Returns once the connection is registered; the answer arrives later.
    pub async fn propose(&self, peer_id: impl Into<String>, addr: SocketAddr) -> HostResult<ConnectionId> {
        let peer_id = peer_id.into();
        self.request(|response_tx| HostEvent::Propose {
            peer_id,
            addr,
            response_tx,
        })
        .await?
    }

    /// Accept the oldest pending proposal. Returns the new peer's ID.
    pub async fn accept(&self) -> HostResult<String> {
        self.request(|response_tx| HostEvent::Decide {
            accept: true,
            response_tx,
        })
        .await?
    }

    /// Reject the oldest pending proposal. Returns the rejected peer's ID.
    pub async fn reject(&self) -> HostResult<String> {
        self.request(|response_tx| HostEvent::Decide {
            accept: false,
            response_tx,
        })
        .await?
    }

    /// Settle every trustline where we owe the peer.
    pub async fn settle_all(&self) -> HostResult<SettleReport> {
        self.request(|response_tx| HostEvent::SettleAll { response_tx }).await
    }

    pub async fn snapshot(&self) -> HostResult<HostSnapshot> {
        self.request(|response_tx| HostEvent::Snapshot { response_tx }).await
    }

    /// Push a raw outbound message, no splitting. The sender is always set to our peer ID.
    pub async fn send(&self, message: Message) -> HostResult<()> {
        self.request(|response_tx| HostEvent::Outbound {
            message,
            response_tx,
        })
        .await?
    }

    /// Ask the Host to close every connection and stop.
    pub async fn shutdown(&self) -> HostResult<()> {
        self.sender
            .events()
            .send(HostEvent::Shutdown)
            .await
            .map_err(|_| HostError::HostStopped)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> HostEvent) -> HostResult<T> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .events()
            .send(make(tx))
            .await
            .map_err(|_| HostError::HostStopped)?;

        rx.await.map_err(|_| HostError::HostStopped)
    }
}
