//! Wire messages exchanged between trustline peers.
//!
//! Every frame on the wire carries exactly one [`Message`]. The `kind` field
//! is a closed enum, so an unknown message type fails to decode instead of
//! falling through to a default.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SerializationError;
use crate::serialization;

/// The five message kinds of the trustline protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Request to open a trustline.
    Propose,
    /// The responder accepted the trustline.
    ProposeAccept,
    /// The responder rejected the trustline.
    ProposeReject,
    /// Off-ledger payment within the trustline.
    Pay,
    /// Notice that the sender settled debt on the ledger.
    Settle,
}

impl MessageKind {
    /// Get a human-readable name for the message kind.
    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::Propose => "propose",
            MessageKind::ProposeAccept => "propose_accept",
            MessageKind::ProposeReject => "propose_reject",
            MessageKind::Pay => "pay",
            MessageKind::Settle => "settle",
        }
    }

    /// Whether this kind moves value across the trustline.
    pub fn is_transfer(&self) -> bool {
        matches!(self, MessageKind::Pay | MessageKind::Settle)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single protocol message.
///
/// `sender_id` is the peer ID of the node that produced the message and
/// `peer_id` the peer ID it is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Message {
    /// Peer ID of the sender.
    pub sender_id: String,
    /// Peer ID of the intended receiver.
    pub peer_id: String,
    /// Message kind.
    pub kind: MessageKind,
    /// Amount moved (zero for proposal messages).
    pub amount: u64,
}

impl Message {
    /// Create a message of any kind.
    pub fn new(
        sender_id: impl Into<String>,
        peer_id: impl Into<String>,
        kind: MessageKind,
        amount: u64,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            peer_id: peer_id.into(),
            kind,
            amount,
        }
    }

    /// Trustline proposal.
    pub fn propose(sender_id: impl Into<String>, peer_id: impl Into<String>) -> Self {
        Self::new(sender_id, peer_id, MessageKind::Propose, 0)
    }

    /// Proposal acceptance.
    pub fn accept(sender_id: impl Into<String>, peer_id: impl Into<String>) -> Self {
        Self::new(sender_id, peer_id, MessageKind::ProposeAccept, 0)
    }

    /// Proposal rejection.
    pub fn reject(sender_id: impl Into<String>, peer_id: impl Into<String>) -> Self {
        Self::new(sender_id, peer_id, MessageKind::ProposeReject, 0)
    }

    /// Payment of `amount`.
    pub fn pay(sender_id: impl Into<String>, peer_id: impl Into<String>, amount: u64) -> Self {
        Self::new(sender_id, peer_id, MessageKind::Pay, amount)
    }

    /// Settlement of `amount`.
    pub fn settle(sender_id: impl Into<String>, peer_id: impl Into<String>, amount: u64) -> Self {
        Self::new(sender_id, peer_id, MessageKind::Settle, amount)
    }

    /// Encode the message payload.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SerializationError> {
        serialization::serialize(self)
    }

    /// Decode a message payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SerializationError> {
        serialization::deserialize(bytes)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MessageKind::Pay | MessageKind::Settle => write!(
                f,
                "{}({} -> {}, amount={})",
                self.kind, self.sender_id, self.peer_id, self.amount
            ),
            _ => write!(f, "{}({} -> {})", self.kind, self.sender_id, self.peer_id),
        }
    }
}
