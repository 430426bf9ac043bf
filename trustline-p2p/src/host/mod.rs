//! The Host: single authority over trustline and connection state.
//!
//! Host runs one sequential loop over [`HostEvent`]s. It is the only code
//! that touches the connection table, the trustlines or the ledger balance,
//! so none of that state needs a lock. Connection tasks reach it through a
//! [`HostSender`]; the command surface through a [`HostHandle`].
//!
//! Settlement calls the ledger from inside the loop. Every other peer's
//! events wait for the call to finish; in exchange a settlement can never
//! interleave with another mutation of the same trustline.

pub mod event;
pub mod handle;
pub mod proposal;
pub mod split;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use trustline_core::{Message, MessageKind, Trustline};
use trustline_ledger::SettlementGateway;

use crate::config::{HostConfig, ProposalPolicy};
use crate::error::{HostError, HostResult};
use crate::manager::{connect_to_peer, ConnectionTable};
use crate::peer::{
    Connection, ConnectionDirection, ConnectionId, ConnectionInfo, ConnectionState,
};
use crate::protocol::encode_frame;

pub use event::{HostEvent, HostSender};
pub use handle::HostHandle;
pub use proposal::{Proposal, ProposalNotice, ProposalQueue};
pub use split::{plan_payment, PaymentStep};

/// One connection as seen in a [`HostSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub id: ConnectionId,
    pub peer_id: Option<String>,
    pub addr: SocketAddr,
    pub direction: ConnectionDirection,
    pub state: ConnectionState,
    /// `(host_balance, peer_balance)` once the trustline exists.
    pub balances: Option<(i64, i64)>,
}

/// Point-in-time view of Host state.
#[derive(Debug, Clone)]
pub struct HostSnapshot {
    pub name: String,
    pub ledger_balance: u64,
    pub limit: u64,
    /// Connections ordered by ID.
    pub connections: Vec<ConnectionSnapshot>,
    /// Indexed peer IDs, sorted.
    pub indexed: Vec<String>,
    /// Peers with an unresolved proposal, oldest first.
    pub pending_proposals: Vec<String>,
    /// Index/set agreement and every trustline's invariants.
    pub consistent: bool,
}

impl HostSnapshot {
    /// Connection indexed under `peer_id`.
    pub fn connection(&self, peer_id: &str) -> Option<&ConnectionSnapshot> {
        self.connections
            .iter()
            .find(|c| c.peer_id.as_deref() == Some(peer_id))
    }

    /// `(host_balance, peer_balance)` of the trustline with `peer_id`.
    pub fn trustline(&self, peer_id: &str) -> Option<(i64, i64)> {
        self.connection(peer_id).and_then(|c| c.balances)
    }

    /// Sum of host balances over every trustline.
    pub fn total_host_balance(&self) -> i64 {
        self.connections
            .iter()
            .filter_map(|c| c.balances)
            .map(|(host, _)| host)
            .sum()
    }
}

/// Outcome of settling all outstanding debt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettleReport {
    /// Peers settled in full, with the amount paid.
    pub settled: Vec<(String, u64)>,
    /// Peers left unsettled and why.
    pub failed: Vec<(String, HostError)>,
}

impl SettleReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// The trustline state manager.
pub struct Host {
    config: Arc<HostConfig>,
    gateway: Arc<dyn SettlementGateway>,
    ledger_balance: u64,
    connections: ConnectionTable,
    proposals: ProposalQueue,
    /// Reply channels of `propose` requests still dialing.
    dials: HashMap<ConnectionId, oneshot::Sender<HostResult<ConnectionId>>>,
    notice_tx: mpsc::UnboundedSender<ProposalNotice>,
    sender: HostSender,
    events_rx: mpsc::Receiver<HostEvent>,
}

impl Host {
    /// Create a Host with its command handle and proposal notice stream.
    pub fn new(
        config: HostConfig,
        gateway: Arc<dyn SettlementGateway>,
    ) -> (Self, HostHandle, mpsc::UnboundedReceiver<ProposalNotice>) {
        let (sender, events_rx) = HostSender::channel();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        let host = Self {
            ledger_balance: config.ledger_balance,
            config: Arc::new(config),
            gateway,
            connections: ConnectionTable::new(),
            proposals: ProposalQueue::new(),
            dials: HashMap::new(),
            notice_tx,
            sender: sender.clone(),
            events_rx,
        };

        (host, HostHandle::new(sender), notice_rx)
    }

    /// Run the event loop until a shutdown request.
    pub async fn run(mut self) {
        tracing::info!(
            name = %self.config.name,
            limit = self.config.trustline_limit,
            ledger_balance = self.ledger_balance,
            policy = %self.config.proposal_policy,
            "Host started"
        );

        while let Some(event) = self.events_rx.recv().await {
            if !self.handle_event(event).await {
                break;
            }
        }

        let closed = self.connections.clear();
        tracing::info!(connections = closed.len(), "Host stopped");
    }

    /// Apply one event. Returns false when the loop should stop.
    async fn handle_event(&mut self, event: HostEvent) -> bool {
        match event {
            HostEvent::Register { info, outbound } => self.handle_register(info, outbound),
            HostEvent::Unregister(conn) => self.unregister(conn),
            HostEvent::DialFailed {
                conn,
                peer_id,
                reason,
            } => self.handle_dial_failed(conn, peer_id, reason),
            HostEvent::Proposal { conn, message } => self.handle_proposal(conn, message),
            HostEvent::Inbound { conn, message } => self.handle_inbound(conn, message),
            HostEvent::Outbound {
                message,
                response_tx,
            } => {
                let result = self.handle_outbound(message).await;
                let _ = response_tx.send(result);
            }
            HostEvent::Pay {
                peer_id,
                amount,
                response_tx,
            } => {
                let result = self.pay(&peer_id, amount).await;
                let _ = response_tx.send(result);
            }
            HostEvent::Settle {
                peer_id,
                amount,
                response_tx,
            } => {
                let message = Message::settle(self.config.name.as_str(), peer_id, amount);
                let result = self.outbound_settle(message).await;
                let _ = response_tx.send(result);
            }
            HostEvent::Propose {
                peer_id,
                addr,
                response_tx,
            } => self.propose(peer_id, addr, response_tx),
            HostEvent::Decide {
                accept,
                response_tx,
            } => {
                let result = self.decide(accept);
                let _ = response_tx.send(result);
            }
            HostEvent::SettleAll { response_tx } => {
                let report = self.settle_all().await;
                let _ = response_tx.send(report);
            }
            HostEvent::Snapshot { response_tx } => {
                let _ = response_tx.send(self.snapshot());
            }
            HostEvent::Shutdown => {
                tracing::info!("Shutdown requested");
                return false;
            }
        }
        true
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    fn handle_register(&mut self, info: ConnectionInfo, outbound: mpsc::UnboundedSender<bytes::Bytes>) {
        let id = info.id;
        let addr = info.addr;
        let reply = self.dials.remove(&id);
        let mut connection = Connection::new(info, outbound);

        // A connection that arrives with a peer ID is one we dialed to propose.
        let dialed = connection.peer_id().map(str::to_string);
        if let Some(peer_id) = &dialed {
            self.connections.stop_dialing(peer_id);
            connection.transition_to(ConnectionState::Pending);
        }

        if let Err(rejected) = self.connections.insert(connection) {
            let peer_id = rejected.peer_id().unwrap_or("?").to_string();
            tracing::warn!(conn = %id, peer = %peer_id, "Duplicate registration, closing connection");
            if let Some(reply) = reply {
                let _ = reply.send(Err(HostError::AlreadyConnected(peer_id)));
            }
            return;
        }

        match dialed {
            Some(peer_id) => {
                tracing::info!(conn = %id, peer = %peer_id, addr = %addr, "Proposing trustline");
                let propose = Message::propose(self.config.name.as_str(), peer_id.as_str());
                let result = if self.enqueue(id, &propose) {
                    Ok(id)
                } else {
                    Err(HostError::ConnectFailed {
                        peer_id,
                        reason: "connection closed before the proposal was sent".to_string(),
                    })
                };
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            None => {
                tracing::debug!(conn = %id, addr = %addr, "Registered inbound connection");
            }
        }
    }

    /// Remove a connection from the set and index, closing its queue. Idempotent.
    fn unregister(&mut self, conn: ConnectionId) {
        let purged = self.proposals.purge(conn);
        if let Some(connection) = self.connections.remove(conn) {
            tracing::info!(
                conn = %conn,
                peer = connection.peer_id().unwrap_or("?"),
                purged_proposals = purged,
                "Unregistered connection"
            );
        }
    }

    /// A dial never produced a connection: release the reservation and report.
    fn handle_dial_failed(&mut self, conn: ConnectionId, peer_id: String, reason: String) {
        self.unregister(conn);
        if let Some(reply) = self.dials.remove(&conn) {
            let _ = reply.send(Err(HostError::ConnectFailed { peer_id, reason }));
        }
    }

    /// Encode and queue a message on a connection.
    fn enqueue(&self, conn: ConnectionId, message: &Message) -> bool {
        let frame = match encode_frame(message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(conn = %conn, msg = %message, error = %e, "Failed to encode message");
                return false;
            }
        };

        if self.connections.send_to(conn, frame) {
            tracing::debug!(conn = %conn, msg = %message, "Queued message");
            true
        } else {
            tracing::debug!(conn = %conn, msg = %message, "Connection gone, message dropped");
            false
        }
    }

    fn propose(
        &mut self,
        peer_id: String,
        addr: SocketAddr,
        response_tx: oneshot::Sender<HostResult<ConnectionId>>,
    ) {
        if peer_id.is_empty() {
            let _ = response_tx.send(Err(HostError::UnknownPeer(peer_id)));
            return;
        }

        let id = self.sender.next_connection_id();
        if !self.connections.start_dialing(&peer_id, id) {
            let _ = response_tx.send(Err(HostError::AlreadyConnected(peer_id)));
            return;
        }

        // Dialing happens off the loop. The reply is sent once the
        // connection registers, or when the dial task reports failure.
        self.dials.insert(id, response_tx);
        let sender = self.sender.clone();
        let connect_timeout = self.config.connect_timeout;
        tokio::spawn(async move {
            if let Err(e) = connect_to_peer(id, peer_id.clone(), addr, connect_timeout, sender.clone()).await {
                tracing::warn!(peer = %peer_id, addr = %addr, error = %e, "Failed to connect to peer");
                let _ = sender.dial_failed(id, peer_id, e.to_string()).await;
            }
        });
    }

    // ========================================================================
    // Proposal negotiation
    // ========================================================================

    fn handle_proposal(&mut self, conn: ConnectionId, message: Message) {
        let Some(connection) = self.connections.get_mut(conn) else {
            tracing::debug!(conn = %conn, "Proposal from unregistered connection");
            return;
        };

        if connection.state() != ConnectionState::Connecting {
            tracing::warn!(
                conn = %conn,
                state = %connection.state(),
                "Ignoring proposal on an identified connection"
            );
            return;
        }

        if message.sender_id.is_empty() {
            tracing::warn!(conn = %conn, "Proposal without a peer ID, dropping connection");
            self.unregister(conn);
            return;
        }

        connection.transition_to(ConnectionState::Pending);
        let peer_id = message.sender_id.clone();
        self.proposals.push(Proposal { conn, message });
        tracing::info!(conn = %conn, peer = %peer_id, "Trustline proposal received");

        let decision = match self.config.proposal_policy {
            ProposalPolicy::Manual => {
                if self.notice_tx.send(ProposalNotice { peer_id }).is_err() {
                    tracing::debug!("No proposal listener, proposal stays queued");
                }
                return;
            }
            ProposalPolicy::AcceptAll => true,
            ProposalPolicy::RejectAll => false,
        };

        if let Err(e) = self.decide(decision) {
            tracing::warn!(error = %e, "Automatic proposal decision failed");
        }
    }

    /// Resolve the oldest pending proposal.
    fn decide(&mut self, accept: bool) -> HostResult<String> {
        let Proposal { conn, message } = self.proposals.pop().ok_or(HostError::NoPendingProposal)?;
        let peer_id = message.sender_id;

        if !accept {
            tracing::info!(conn = %conn, peer = %peer_id, "Rejecting trustline proposal");
            self.refuse(conn, &peer_id);
            return Ok(peer_id);
        }

        if self.connections.contains_peer(&peer_id) || self.connections.is_dialing(&peer_id) {
            tracing::warn!(conn = %conn, peer = %peer_id, "Peer already connected, refusing proposal");
            self.refuse(conn, &peer_id);
            return Err(HostError::AlreadyConnected(peer_id));
        }

        if !self.connections.assign_peer_id(conn, &peer_id) {
            return Err(HostError::UnknownPeer(peer_id));
        }

        let limit = self.config.trustline_limit;
        if let Some(connection) = self.connections.get_mut(conn) {
            connection.open_trustline(limit);
        }

        let accept = Message::accept(self.config.name.as_str(), peer_id.as_str());
        self.enqueue(conn, &accept);
        tracing::info!(conn = %conn, peer = %peer_id, limit, "Trustline established");

        Ok(peer_id)
    }

    /// Send `ProposeReject` on a connection, then drop it.
    fn refuse(&mut self, conn: ConnectionId, peer_id: &str) {
        let reject = Message::reject(self.config.name.as_str(), peer_id);
        self.enqueue(conn, &reject);
        self.unregister(conn);
    }

    // ========================================================================
    // Inbound messages
    // ========================================================================

    fn handle_inbound(&mut self, conn: ConnectionId, message: Message) {
        if message.kind == MessageKind::Propose {
            self.handle_proposal(conn, message);
            return;
        }

        let limit = self.config.trustline_limit;
        let Some(connection) = self.connections.get_mut(conn) else {
            tracing::debug!(conn = %conn, msg = %message, "Message from unregistered connection");
            return;
        };

        if connection.peer_id() != Some(message.sender_id.as_str()) {
            tracing::warn!(
                conn = %conn,
                msg = %message,
                peer = connection.peer_id().unwrap_or("?"),
                "Sender does not match connection peer, ignoring"
            );
            return;
        }

        if message.kind.is_transfer() && connection.is_pending() {
            tracing::warn!(
                conn = %conn,
                msg = %message,
                state = %connection.state(),
                "Transfer on a pending connection, ignoring"
            );
            return;
        }

        match message.kind {
            MessageKind::Pay | MessageKind::Settle => {
                let Some(line) = connection.trustline_mut() else {
                    return;
                };
                let applied = match message.kind {
                    MessageKind::Pay => line.credit(message.amount),
                    _ => line.debit(message.amount),
                };
                let host_balance = line.host_balance();

                match applied {
                    Ok(()) => tracing::info!(
                        conn = %conn,
                        peer = %message.sender_id,
                        kind = %message.kind,
                        amount = message.amount,
                        host_balance,
                        "Applied inbound transfer"
                    ),
                    Err(e) => {
                        tracing::warn!(
                            conn = %conn,
                            msg = %message,
                            error = %e,
                            "Inbound transfer breaks the trustline, dropping connection"
                        );
                        self.unregister(conn);
                    }
                }
            }
            MessageKind::ProposeAccept => {
                if connection.state() == ConnectionState::Pending
                    && connection.direction() == ConnectionDirection::Outbound
                {
                    connection.open_trustline(limit);
                    tracing::info!(conn = %conn, peer = %message.sender_id, limit, "Trustline accepted by peer");
                } else {
                    tracing::warn!(
                        conn = %conn,
                        state = %connection.state(),
                        "Unexpected proposal acceptance, ignoring"
                    );
                }
            }
            MessageKind::ProposeReject => {
                tracing::info!(conn = %conn, peer = %message.sender_id, "Trustline rejected by peer");
                self.unregister(conn);
            }
            MessageKind::Propose => {}
        }
    }

    // ========================================================================
    // Outbound messages
    // ========================================================================

    async fn handle_outbound(&mut self, mut message: Message) -> HostResult<()> {
        if message.sender_id != self.config.name {
            tracing::debug!(msg = %message, "Stamping outbound message with our peer ID");
            message.sender_id = self.config.name.clone();
        }

        match message.kind {
            MessageKind::Pay => self.outbound_pay(message),
            MessageKind::Settle => self.outbound_settle(message).await,
            MessageKind::Propose | MessageKind::ProposeAccept => {
                let conn = self.indexed(&message.peer_id)?;
                self.enqueue(conn, &message);
                Ok(())
            }
            MessageKind::ProposeReject => {
                let conn = self.indexed(&message.peer_id)?;
                self.enqueue(conn, &message);
                self.unregister(conn);
                Ok(())
            }
        }
    }

    fn indexed(&self, peer_id: &str) -> HostResult<ConnectionId> {
        self.connections
            .by_peer(peer_id)
            .map(Connection::id)
            .ok_or_else(|| HostError::UnknownPeer(peer_id.to_string()))
    }

    /// Connection for `peer_id`, provided its trustline is established.
    fn active_connection_mut(&mut self, peer_id: &str) -> HostResult<&mut Connection> {
        let connection = self
            .connections
            .by_peer_mut(peer_id)
            .ok_or_else(|| HostError::UnknownPeer(peer_id.to_string()))?;

        if !connection.is_active() {
            return Err(HostError::PendingConnection(peer_id.to_string()));
        }
        Ok(connection)
    }

    fn active_trustline(&mut self, peer_id: &str) -> HostResult<(ConnectionId, Trustline)> {
        let connection = self.active_connection_mut(peer_id)?;
        let line = connection
            .trustline()
            .copied()
            .ok_or_else(|| HostError::PendingConnection(peer_id.to_string()))?;
        Ok((connection.id(), line))
    }

    fn outbound_pay(&mut self, message: Message) -> HostResult<()> {
        let (conn, line) = self.active_trustline(&message.peer_id)?;
        if message.amount == 0 {
            return Err(HostError::InvalidAmount {
                amount: 0,
                reason: "payment must be positive",
            });
        }
        line.check_debit(message.amount)?;

        // Nothing is applied unless the frame is on its way to the peer.
        if !self.enqueue(conn, &message) {
            return Err(HostError::Disconnected(message.peer_id));
        }

        let connection = self.active_connection_mut(&message.peer_id)?;
        let line = connection
            .trustline_mut()
            .ok_or_else(|| HostError::PendingConnection(message.peer_id.clone()))?;
        line.debit(message.amount)?;

        tracing::info!(
            conn = %conn,
            peer = %message.peer_id,
            amount = message.amount,
            host_balance = line.host_balance(),
            "Applied outbound payment"
        );
        Ok(())
    }

    /// Settle debt: the ledger pays first, the trustline moves only if it succeeded.
    async fn outbound_settle(&mut self, message: Message) -> HostResult<()> {
        let amount = message.amount;
        let (conn, line) = self.active_trustline(&message.peer_id)?;

        if amount == 0 {
            return Err(HostError::InvalidAmount {
                amount,
                reason: "settlement must be positive",
            });
        }
        if line.host_balance() >= 0 {
            return Err(HostError::NothingToSettle {
                peer_id: message.peer_id,
                host_balance: line.host_balance(),
            });
        }
        if amount > line.debt() {
            return Err(HostError::InvalidAmount {
                amount,
                reason: "exceeds outstanding debt",
            });
        }
        if self.ledger_balance < amount {
            return Err(HostError::InsufficientCredit(format!(
                "ledger balance {} cannot cover settlement of {}",
                self.ledger_balance, amount
            )));
        }

        let writable = self.connections.get(conn).map_or(false, Connection::is_writable);
        if !writable {
            return Err(HostError::Disconnected(message.peer_id));
        }

        let gateway = Arc::clone(&self.gateway);
        if let Err(e) = gateway
            .pay_user(&self.config.name, &message.peer_id, &self.config.credential, amount)
            .await
        {
            tracing::warn!(
                peer = %message.peer_id,
                amount,
                ledger = gateway.name(),
                error = %e,
                "Ledger refused settlement"
            );
            return Err(HostError::Settlement(e));
        }

        let connection = self.active_connection_mut(&message.peer_id)?;
        if let Some(line) = connection.trustline_mut() {
            line.credit(amount)?;
        }
        self.ledger_balance -= amount;

        tracing::info!(
            conn = %conn,
            peer = %message.peer_id,
            amount,
            ledger_balance = self.ledger_balance,
            "Settled debt on ledger"
        );
        if !self.enqueue(conn, &message) {
            tracing::warn!(
                conn = %conn,
                peer = %message.peer_id,
                amount,
                "Ledger settlement done but the peer connection is gone, peer was not notified"
            );
        }
        Ok(())
    }

    /// Pay a peer, splitting the amount when it would exceed the limit.
    ///
    /// Steps run in order through the outbound path; a failing step stops
    /// the sequence and earlier steps stay applied.
    async fn pay(&mut self, peer_id: &str, amount: u64) -> HostResult<Vec<PaymentStep>> {
        let (_, line) = self.active_trustline(peer_id)?;
        let steps = plan_payment(line.peer_balance(), line.limit(), amount)?;

        if steps.len() > 1 {
            tracing::info!(peer = %peer_id, amount, steps = steps.len(), "Splitting payment over trustline limit");
        }

        for step in &steps {
            let message = step.to_message(&self.config.name, peer_id);
            let result = match step {
                PaymentStep::Pay(_) => self.outbound_pay(message),
                PaymentStep::Settle(_) => self.outbound_settle(message).await,
            };

            if let Err(e) = result {
                tracing::warn!(peer = %peer_id, step = %step, error = %e, "Payment step failed");
                return Err(e);
            }
        }

        Ok(steps)
    }

    /// Settle the full debt on every trustline where we owe the peer.
    async fn settle_all(&mut self) -> SettleReport {
        let mut debts: Vec<(String, u64)> = self
            .connections
            .iter()
            .filter(|c| c.is_active())
            .filter_map(|c| {
                let debt = c.trustline()?.debt();
                let peer_id = c.peer_id()?;
                (debt > 0).then(|| (peer_id.to_string(), debt))
            })
            .collect();
        debts.sort();

        let mut report = SettleReport::default();
        for (peer_id, debt) in debts {
            let message = Message::settle(self.config.name.as_str(), peer_id.as_str(), debt);
            match self.outbound_settle(message).await {
                Ok(()) => report.settled.push((peer_id, debt)),
                Err(e) => {
                    tracing::warn!(peer = %peer_id, debt, error = %e, "Could not settle trustline");
                    report.failed.push((peer_id, e));
                }
            }
        }
        report
    }

    fn snapshot(&self) -> HostSnapshot {
        let mut connections: Vec<ConnectionSnapshot> = self
            .connections
            .iter()
            .map(|c| ConnectionSnapshot {
                id: c.id(),
                peer_id: c.peer_id().map(str::to_string),
                addr: c.addr(),
                direction: c.direction(),
                state: c.state(),
                balances: c.trustline().map(|t| (t.host_balance(), t.peer_balance())),
            })
            .collect();
        connections.sort_by_key(|c| c.id);

        let trustlines_ok = self
            .connections
            .iter()
            .filter_map(Connection::trustline)
            .all(Trustline::is_consistent);
        let pending_guard_ok = self
            .connections
            .iter()
            .all(|c| c.is_active() == c.trustline().is_some());

        HostSnapshot {
            name: self.config.name.clone(),
            ledger_balance: self.ledger_balance,
            limit: self.config.trustline_limit,
            connections,
            indexed: self.connections.peer_ids(),
            pending_proposals: self.proposals.peer_ids(),
            consistent: self.connections.is_consistent() && trustlines_ok && pending_guard_ok,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{Bytes, BytesMut};
    use tokio_util::codec::Decoder;
    use trustline_ledger::MemoryLedger;

    use crate::protocol::MessageCodec;

    const LIMIT: u64 = 100;

    struct Harness {
        handle: HostHandle,
        sender: HostSender,
        notices: mpsc::UnboundedReceiver<ProposalNotice>,
        ledger: Arc<MemoryLedger>,
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:12345".parse().unwrap()
    }

    async fn start(policy: ProposalPolicy, ledger_balance: u64) -> Harness {
        let ledger = Arc::new(MemoryLedger::new());
        for name in ["alice", "bob", "carol"] {
            ledger.register_user(name, ledger_balance, "pw", addr()).await.unwrap();
        }

        let config = HostConfig::new("alice", addr())
            .with_trustline_limit(LIMIT)
            .with_ledger_balance(ledger_balance)
            .with_credential("pw")
            .with_proposal_policy(policy);
        let (host, handle, notices) = Host::new(config, ledger.clone());
        tokio::spawn(host.run());

        Harness {
            sender: handle.host_sender(),
            handle,
            notices,
            ledger,
        }
    }

    /// Register a simulated inbound connection and send its proposal.
    async fn propose_from(h: &Harness, peer: &str) -> (ConnectionId, mpsc::UnboundedReceiver<Bytes>) {
        let id = h.sender.next_connection_id();
        let (tx, rx) = mpsc::unbounded_channel();
        h.sender
            .register(ConnectionInfo::new(id, addr(), ConnectionDirection::Inbound), tx)
            .await
            .unwrap();
        h.sender.proposal(id, Message::propose(peer, "alice")).await.unwrap();
        (id, rx)
    }

    /// Register a simulated connection we "dialed" to `peer`.
    async fn dialed(h: &Harness, peer: &str) -> (ConnectionId, mpsc::UnboundedReceiver<Bytes>) {
        let id = h.sender.next_connection_id();
        let (tx, rx) = mpsc::unbounded_channel();
        let info = ConnectionInfo::new(id, addr(), ConnectionDirection::Outbound).with_peer_id(peer);
        h.sender.register(info, tx).await.unwrap();
        (id, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> Vec<Message> {
        let mut codec = MessageCodec::new();
        let mut messages = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            let mut buf = BytesMut::from(&frame[..]);
            if let Some(message) = codec.decode(&mut buf).unwrap() {
                messages.push(message);
            }
        }
        messages
    }

    #[tokio::test]
    async fn test_accept_creates_zeroed_trustline() {
        let mut h = start(ProposalPolicy::Manual, 500).await;
        let (_conn, mut rx) = propose_from(&h, "bob").await;

        let notice = h.notices.recv().await.unwrap();
        assert_eq!(notice.peer_id, "bob");

        let snapshot = h.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.pending_proposals, vec!["bob".to_string()]);
        assert!(snapshot.indexed.is_empty());

        assert_eq!(h.handle.accept().await.unwrap(), "bob");

        let snapshot = h.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.trustline("bob"), Some((0, 0)));
        assert_eq!(snapshot.connection("bob").unwrap().state, ConnectionState::Active);
        assert!(snapshot.pending_proposals.is_empty());
        assert!(snapshot.consistent);

        assert_eq!(drain(&mut rx), vec![Message::accept("alice", "bob")]);
    }

    #[tokio::test]
    async fn test_split_payment_scenario() {
        let h = start(ProposalPolicy::AcceptAll, 500).await;
        let (_conn, mut rx) = propose_from(&h, "bob").await;

        h.handle.pay("bob", 80).await.unwrap();
        assert_eq!(h.handle.snapshot().await.unwrap().trustline("bob"), Some((-80, 80)));

        let steps = h.handle.pay("bob", 30).await.unwrap();
        assert_eq!(
            steps,
            vec![PaymentStep::Pay(20), PaymentStep::Settle(100), PaymentStep::Pay(10)]
        );

        let snapshot = h.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.trustline("bob"), Some((-10, 10)));
        assert_eq!(snapshot.ledger_balance, 400);
        assert!(snapshot.consistent);

        assert_eq!(
            drain(&mut rx),
            vec![
                Message::accept("alice", "bob"),
                Message::pay("alice", "bob", 80),
                Message::pay("alice", "bob", 20),
                Message::settle("alice", "bob", 100),
                Message::pay("alice", "bob", 10),
            ]
        );
        assert_eq!(h.ledger.balance_of("alice").await, Some(400));
        assert_eq!(h.ledger.balance_of("bob").await, Some(600));
    }

    #[tokio::test]
    async fn test_failed_settle_step_keeps_earlier_pay() {
        // Ledger balance too small for the settle step.
        let h = start(ProposalPolicy::AcceptAll, 50).await;
        let (_conn, _rx) = propose_from(&h, "bob").await;

        h.handle.pay("bob", 80).await.unwrap();
        let err = h.handle.pay("bob", 30).await.unwrap_err();
        assert!(matches!(err, HostError::InsufficientCredit(_)));

        let snapshot = h.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.trustline("bob"), Some((-100, 100)));
        assert_eq!(snapshot.ledger_balance, 50);
    }

    #[tokio::test]
    async fn test_pending_guard() {
        let h = start(ProposalPolicy::Manual, 500).await;
        let (_conn, mut rx) = dialed(&h, "bob").await;

        assert_eq!(drain_after_snapshot(&h, &mut rx).await, vec![Message::propose("alice", "bob")]);

        let err = h.handle.pay("bob", 10).await.unwrap_err();
        assert_eq!(err, HostError::PendingConnection("bob".to_string()));
        let err = h.handle.send(Message::pay("alice", "bob", 10)).await.unwrap_err();
        assert_eq!(err, HostError::PendingConnection("bob".to_string()));

        let snapshot = h.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.connection("bob").unwrap().state, ConnectionState::Pending);
        assert_eq!(snapshot.trustline("bob"), None);
        assert!(drain(&mut rx).is_empty());
    }

    async fn drain_after_snapshot(h: &Harness, rx: &mut mpsc::UnboundedReceiver<Bytes>) -> Vec<Message> {
        // A snapshot reply means every earlier event has been applied.
        h.handle.snapshot().await.unwrap();
        drain(rx)
    }

    #[tokio::test]
    async fn test_reject_removes_connection() {
        let mut h = start(ProposalPolicy::Manual, 500).await;
        let (conn, mut rx) = propose_from(&h, "bob").await;
        h.notices.recv().await.unwrap();

        assert_eq!(h.handle.reject().await.unwrap(), "bob");

        let snapshot = h.handle.snapshot().await.unwrap();
        assert!(snapshot.connections.iter().all(|c| c.id != conn));
        assert!(snapshot.indexed.is_empty());
        assert!(snapshot.consistent);

        // The reject frame is flushed, then the queue is closed.
        assert_eq!(drain(&mut rx), vec![Message::reject("alice", "bob")]);
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));

        assert_eq!(h.handle.reject().await.unwrap_err(), HostError::NoPendingProposal);
    }

    #[tokio::test]
    async fn test_dialed_connection_accepted_and_rejected() {
        let h = start(ProposalPolicy::Manual, 500).await;
        let (bob, _bob_rx) = dialed(&h, "bob").await;
        let (carol, _carol_rx) = dialed(&h, "carol").await;

        h.sender.inbound(bob, Message::accept("bob", "alice")).await.unwrap();
        h.sender.inbound(carol, Message::reject("carol", "alice")).await.unwrap();

        let snapshot = h.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.trustline("bob"), Some((0, 0)));
        assert_eq!(snapshot.indexed, vec!["bob".to_string()]);
        assert!(snapshot.consistent);
    }

    #[tokio::test]
    async fn test_settle_no_op_law() {
        let h = start(ProposalPolicy::AcceptAll, 500).await;
        let (conn, mut rx) = propose_from(&h, "bob").await;

        // Host balance is zero: nothing to settle.
        let err = h.handle.settle("bob", 10).await.unwrap_err();
        assert!(matches!(err, HostError::NothingToSettle { host_balance: 0, .. }));

        // Peer pays us: host balance positive, still nothing to settle.
        h.sender.inbound(conn, Message::pay("bob", "alice", 40)).await.unwrap();
        let err = h.handle.settle("bob", 10).await.unwrap_err();
        assert!(matches!(err, HostError::NothingToSettle { host_balance: 40, .. }));

        h.handle.pay("bob", 70).await.unwrap();
        let err = h.handle.settle("bob", 0).await.unwrap_err();
        assert!(matches!(err, HostError::InvalidAmount { amount: 0, .. }));
        let err = h.handle.settle("bob", 31).await.unwrap_err();
        assert!(matches!(err, HostError::InvalidAmount { amount: 31, .. }));

        let snapshot = h.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.trustline("bob"), Some((-30, 30)));
        assert_eq!(snapshot.ledger_balance, 500);

        h.handle.settle("bob", 30).await.unwrap();
        let snapshot = h.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.trustline("bob"), Some((0, 0)));
        assert_eq!(snapshot.ledger_balance, 470);

        let sent = drain(&mut rx);
        assert_eq!(sent.last(), Some(&Message::settle("alice", "bob", 30)));
    }

    #[tokio::test]
    async fn test_ledger_failure_mutates_nothing() {
        let h = start(ProposalPolicy::AcceptAll, 500).await;
        let (_conn, mut rx) = propose_from(&h, "dave").await;
        h.handle.pay("dave", 50).await.unwrap();
        drain_after_snapshot(&h, &mut rx).await;

        // "dave" is unknown to the ledger.
        let err = h.handle.settle("dave", 50).await.unwrap_err();
        assert!(matches!(err, HostError::Settlement(_)));

        let snapshot = h.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.trustline("dave"), Some((-50, 50)));
        assert_eq!(snapshot.ledger_balance, 500);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_inbound_guards() {
        let h = start(ProposalPolicy::AcceptAll, 500).await;
        let (bob, mut bob_rx) = propose_from(&h, "bob").await;
        let (carol, _carol_rx) = propose_from(&h, "carol").await;

        // Sender mismatch is ignored.
        h.sender.inbound(bob, Message::pay("carol", "alice", 10)).await.unwrap();
        // Within limit.
        h.sender.inbound(bob, Message::pay("bob", "alice", 60)).await.unwrap();
        let snapshot = h.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.trustline("bob"), Some((60, -60)));

        // Over the limit: protocol violation, connection dropped.
        h.sender.inbound(bob, Message::pay("bob", "alice", 50)).await.unwrap();
        let snapshot = h.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.trustline("bob"), None);
        assert_eq!(snapshot.indexed, vec!["carol".to_string()]);
        assert!(snapshot.consistent);

        drain(&mut bob_rx);
        assert!(matches!(
            bob_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));

        // Unaffected peer still works.
        h.sender.inbound(carol, Message::settle("carol", "alice", 0)).await.unwrap();
        h.handle.pay("carol", 5).await.unwrap();
        assert_eq!(h.handle.snapshot().await.unwrap().trustline("carol"), Some((-5, 5)));
    }

    #[tokio::test]
    async fn test_transfer_on_pending_inbound_ignored() {
        let h = start(ProposalPolicy::Manual, 500).await;
        let (conn, _rx) = propose_from(&h, "bob").await;

        h.sender.inbound(conn, Message::pay("bob", "alice", 10)).await.unwrap();

        let snapshot = h.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.pending_proposals, vec!["bob".to_string()]);
        assert!(snapshot.connections.iter().all(|c| c.balances.is_none()));
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent_and_purges_proposals() {
        let h = start(ProposalPolicy::Manual, 500).await;
        let (conn, _rx) = propose_from(&h, "bob").await;

        h.sender.unregister(conn).await.unwrap();
        h.sender.unregister(conn).await.unwrap();

        let snapshot = h.handle.snapshot().await.unwrap();
        assert!(snapshot.connections.is_empty());
        assert!(snapshot.pending_proposals.is_empty());
        assert_eq!(h.handle.accept().await.unwrap_err(), HostError::NoPendingProposal);
    }

    #[tokio::test]
    async fn test_duplicate_peer_refused() {
        let h = start(ProposalPolicy::AcceptAll, 500).await;
        let (_first, _rx1) = propose_from(&h, "bob").await;
        let (second, mut rx2) = propose_from(&h, "bob").await;

        let snapshot = h.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.indexed, vec!["bob".to_string()]);
        assert!(snapshot.connections.iter().all(|c| c.id != second));
        assert_eq!(drain(&mut rx2), vec![Message::reject("alice", "bob")]);
    }

    #[tokio::test]
    async fn test_unknown_peer_and_zero_payment() {
        let h = start(ProposalPolicy::AcceptAll, 500).await;
        let (_conn, _rx) = propose_from(&h, "bob").await;

        assert_eq!(
            h.handle.pay("nobody", 10).await.unwrap_err(),
            HostError::UnknownPeer("nobody".to_string())
        );
        assert!(matches!(
            h.handle.pay("bob", 0).await.unwrap_err(),
            HostError::InvalidAmount { amount: 0, .. }
        ));
        assert!(matches!(
            h.handle.send(Message::pay("alice", "bob", 101)).await.unwrap_err(),
            HostError::InsufficientCredit(_)
        ));
        assert_eq!(h.handle.snapshot().await.unwrap().trustline("bob"), Some((0, 0)));
    }

    #[tokio::test]
    async fn test_settle_all() {
        let h = start(ProposalPolicy::AcceptAll, 500).await;
        let (_b, _rb) = propose_from(&h, "bob").await;
        let (_c, _rc) = propose_from(&h, "carol").await;
        let (_d, _rd) = propose_from(&h, "dave").await;

        h.handle.pay("bob", 40).await.unwrap();
        h.handle.pay("carol", 60).await.unwrap();
        h.handle.pay("dave", 10).await.unwrap();

        let report = h.handle.settle_all().await.unwrap();
        assert_eq!(
            report.settled,
            vec![("bob".to_string(), 40), ("carol".to_string(), 60)]
        );
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "dave");
        assert!(!report.is_complete());

        let snapshot = h.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.ledger_balance, 400);
        assert_eq!(snapshot.total_host_balance(), -10);
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections() {
        let h = start(ProposalPolicy::AcceptAll, 500).await;
        let (_conn, mut rx) = propose_from(&h, "bob").await;

        h.handle.shutdown().await.unwrap();

        // Queue drains then reports closed once the Host has stopped.
        while rx.recv().await.is_some() {}
        assert_eq!(h.handle.snapshot().await.unwrap_err(), HostError::HostStopped);
    }

    #[tokio::test]
    async fn test_send_stamps_own_peer_id() {
        let h = start(ProposalPolicy::AcceptAll, 500).await;
        let (_conn, mut rx) = propose_from(&h, "bob").await;
        assert_eq!(drain_after_snapshot(&h, &mut rx).await, vec![Message::accept("alice", "bob")]);

        h.handle.send(Message::pay("mallory", "bob", 10)).await.unwrap();

        assert_eq!(drain(&mut rx), vec![Message::pay("alice", "bob", 10)]);
        let snapshot = h.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.trustline("bob"), Some((-10, 10)));
        assert!(snapshot.consistent);
    }

    #[tokio::test]
    async fn test_pay_to_closed_writer_changes_nothing() {
        let h = start(ProposalPolicy::AcceptAll, 500).await;
        let (_conn, rx) = propose_from(&h, "bob").await;
        h.handle.snapshot().await.unwrap();
        drop(rx);

        assert_eq!(
            h.handle.pay("bob", 10).await.unwrap_err(),
            HostError::Disconnected("bob".to_string())
        );
        assert_eq!(
            h.handle.send(Message::pay("alice", "bob", 10)).await.unwrap_err(),
            HostError::Disconnected("bob".to_string())
        );
        assert_eq!(h.handle.snapshot().await.unwrap().trustline("bob"), Some((0, 0)));
    }

    #[tokio::test]
    async fn test_settle_to_closed_writer_skips_ledger() {
        let h = start(ProposalPolicy::AcceptAll, 500).await;
        let (_conn, rx) = propose_from(&h, "bob").await;
        h.handle.pay("bob", 30).await.unwrap();
        drop(rx);

        assert_eq!(
            h.handle.settle("bob", 30).await.unwrap_err(),
            HostError::Disconnected("bob".to_string())
        );

        let snapshot = h.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.trustline("bob"), Some((-30, 30)));
        assert_eq!(snapshot.ledger_balance, 500);
        assert_eq!(h.ledger.balance_of("alice").await, Some(500));
        assert_eq!(h.ledger.balance_of("bob").await, Some(500));
    }

    /// A Host that is driven by calling its handlers directly.
    fn idle_host() -> Host {
        let config = HostConfig::new("alice", addr()).with_trustline_limit(LIMIT);
        let (host, _handle, _notices) = Host::new(config, Arc::new(MemoryLedger::new()));
        host
    }

    fn dial(host: &mut Host, id: u64, peer: &str) -> (ConnectionId, oneshot::Receiver<HostResult<ConnectionId>>) {
        let id = ConnectionId::new(id);
        let (reply_tx, reply_rx) = oneshot::channel();
        assert!(host.connections.start_dialing(peer, id));
        host.dials.insert(id, reply_tx);
        (id, reply_rx)
    }

    #[tokio::test]
    async fn test_dialed_registration_replies_with_id() {
        let mut host = idle_host();
        let (id, reply) = dial(&mut host, 1, "bob");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let info = ConnectionInfo::new(id, addr(), ConnectionDirection::Outbound).with_peer_id("bob");
        host.handle_register(info, tx);

        assert_eq!(reply.await.unwrap(), Ok(id));
        assert_eq!(drain(&mut rx), vec![Message::propose("alice", "bob")]);
        assert!(!host.connections.is_dialing("bob"));
        assert!(host.dials.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_dialed_registration_is_refused() {
        let mut host = idle_host();
        let (second, reply) = dial(&mut host, 2, "bob");

        // Another connection to bob registers first.
        let first = ConnectionId::new(1);
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let info = ConnectionInfo::new(first, addr(), ConnectionDirection::Outbound).with_peer_id("bob");
        host.handle_register(info, tx1);

        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let info = ConnectionInfo::new(second, addr(), ConnectionDirection::Outbound).with_peer_id("bob");
        host.handle_register(info, tx2);

        assert_eq!(
            reply.await.unwrap(),
            Err(HostError::AlreadyConnected("bob".to_string()))
        );
        // Refused connection's queue is closed without a proposal.
        assert_eq!(rx2.recv().await, None);
        assert_eq!(host.connections.len(), 1);
        assert!(host.dials.is_empty());
    }

    #[tokio::test]
    async fn test_dial_failure_replies_and_releases_peer() {
        let mut host = idle_host();
        let (id, reply) = dial(&mut host, 1, "bob");

        host.handle_dial_failed(id, "bob".to_string(), "connection refused".to_string());

        assert_eq!(
            reply.await.unwrap(),
            Err(HostError::ConnectFailed {
                peer_id: "bob".to_string(),
                reason: "connection refused".to_string(),
            })
        );
        assert!(!host.connections.is_dialing("bob"));
        assert!(host.dials.is_empty());
        assert!(host.connections.is_empty());
    }
}
