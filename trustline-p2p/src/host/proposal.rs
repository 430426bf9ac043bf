//! Trustline proposal negotiation.
//!
//! An inbound `Propose` pairs a not-yet-identified connection with the
//! message that named the peer. Proposals wait in FIFO order for the
//! operator; `accept`/`reject` always resolve the oldest one.

use std::collections::VecDeque;

use trustline_core::Message;

use crate::peer::ConnectionId;

/// An unresolved trustline proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    /// Connection the proposal arrived on.
    pub conn: ConnectionId,
    /// The `Propose` message.
    pub message: Message,
}

impl Proposal {
    /// Peer ID the proposer claims.
    pub fn peer_id(&self) -> &str {
        &self.message.sender_id
    }
}

/// Notice sent to the decision-maker when a proposal is queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalNotice {
    /// Peer asking to open a trustline.
    pub peer_id: String,
}

/// FIFO of proposals awaiting a decision.
#[derive(Debug, Default)]
pub struct ProposalQueue {
    queue: VecDeque<Proposal>,
}

impl ProposalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, proposal: Proposal) {
        self.queue.push_back(proposal);
    }

    /// Take the oldest proposal.
    pub fn pop(&mut self) -> Option<Proposal> {
        self.queue.pop_front()
    }

    /// Drop every proposal that arrived on `conn`.
    pub fn purge(&mut self, conn: ConnectionId) -> usize {
        let before = self.queue.len();
        self.queue.retain(|proposal| proposal.conn != conn);
        before - self.queue.len()
    }

    /// Peer IDs of queued proposals, oldest first.
    pub fn peer_ids(&self) -> Vec<String> {
        self.queue.iter().map(|p| p.peer_id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
