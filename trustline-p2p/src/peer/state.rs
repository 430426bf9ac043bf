//! Connection state machine.

use std::fmt;

/// Lifecycle state of a connection.
///
/// ```text
/// Connecting -> Pending -> Active
///      \           \         \
///       +-----------+---------+--> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// TCP connection registered, nothing exchanged yet.
    #[default]
    Connecting,
    /// Proposal sent or received, awaiting resolution.
    Pending,
    /// Trustline established.
    Active,
    /// Unregistered. Terminal.
    Closed,
}

impl ConnectionState {
    /// Whether Pay/Settle must be refused (no trustline yet).
    pub fn is_pending(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Pending)
    }

    /// Whether the trustline is established.
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Active)
    }

    /// Whether the connection has been closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }

    /// Check whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (*self, next),
            (Connecting, Pending) | (Pending, Active) | (Connecting | Pending | Active, Closed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Pending => write!(f, "pending"),
            ConnectionState::Active => write!(f, "active"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}
