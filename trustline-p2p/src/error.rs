//! P2P and Host error types.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

use trustline_core::{BalanceError, SerializationError};
use trustline_ledger::LedgerError;

/// Connection and framing errors.
#[derive(Debug, Error)]
pub enum P2pError {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failed to serialize or deserialize a message.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Message exceeds maximum allowed size.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Invalid network magic bytes.
    #[error("Invalid network magic: expected {expected:?}, got {actual:?}")]
    InvalidMagic { expected: [u8; 4], actual: [u8; 4] },

    /// Connection timed out.
    #[error("Connection timeout to {addr}")]
    ConnectionTimeout { addr: SocketAddr },

    /// The settlement ledger refused a startup request.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Host is shutting down.
    #[error("Host shutting down")]
    Shutdown,
}

impl From<SerializationError> for P2pError {
    fn from(err: SerializationError) -> Self {
        P2pError::Serialization(err.to_string())
    }
}

/// Result type for connection and framing operations.
pub type P2pResult<T> = Result<T, P2pError>;

/// Outcome errors of Host operations, reported back to the caller.
///
/// None of these abort the Host loop; a failed operation leaves state
/// unchanged unless noted on the variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// The operation would exceed the trustline limit or the ledger balance.
    #[error("Insufficient credit: {0}")]
    InsufficientCredit(String),

    /// No connection is indexed under this peer ID.
    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    /// The connection is still awaiting proposal resolution.
    #[error("Connection to {0} is pending")]
    PendingConnection(String),

    /// Amount is zero or out of range for the operation.
    #[error("Invalid amount {amount}: {reason}")]
    InvalidAmount { amount: u64, reason: &'static str },

    /// Settle requested while we owe the peer nothing.
    #[error("Nothing to settle with {peer_id}: host balance is {host_balance}")]
    NothingToSettle { peer_id: String, host_balance: i64 },

    /// A connection to this peer already exists or is being dialed.
    #[error("Already connected to {0}")]
    AlreadyConnected(String),

    /// `accept`/`reject` with an empty proposal queue.
    #[error("No pending proposal")]
    NoPendingProposal,

    /// The ledger refused the settlement payment.
    #[error("Settlement failed: {0}")]
    Settlement(#[from] LedgerError),

    /// Dialing the peer failed.
    #[error("Failed to connect to {peer_id}: {reason}")]
    ConnectFailed { peer_id: String, reason: String },

    /// The peer's connection went away before the message could be sent.
    #[error("Connection to {0} was lost")]
    Disconnected(String),

    /// The Host loop is no longer running.
    #[error("Host stopped")]
    HostStopped,
}

impl From<BalanceError> for HostError {
    fn from(err: BalanceError) -> Self {
        match err {
            BalanceError::LimitExceeded { .. } => HostError::InsufficientCredit(err.to_string()),
            BalanceError::InvalidAmount(amount) => HostError::InvalidAmount {
                amount,
                reason: "out of balance range",
            },
        }
    }
}

/// Result type for Host operations.
pub type HostResult<T> = Result<T, HostError>;
