//! Connection identification.

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Opaque handle for one TCP connection, unique for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Create a connection ID from a counter value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Direction of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionDirection {
    /// We dialed the peer to propose a trustline.
    Outbound,
    /// Peer connected to us.
    Inbound,
}

impl fmt::Display for ConnectionDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionDirection::Outbound => write!(f, "outbound"),
            ConnectionDirection::Inbound => write!(f, "inbound"),
        }
    }
}

/// What is known about a connection when it is registered.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Connection handle.
    pub id: ConnectionId,
    /// Remote socket address.
    pub addr: SocketAddr,
    /// Direction of the connection.
    pub direction: ConnectionDirection,
    /// Peer ID, known up front only for connections we dialed.
    pub peer_id: Option<String>,
    /// When the TCP connection was established.
    pub connected_at: Instant,
}

impl ConnectionInfo {
    /// Create info for a new connection with no peer ID yet.
    pub fn new(id: ConnectionId, addr: SocketAddr, direction: ConnectionDirection) -> Self {
        Self {
            id,
            addr,
            direction,
            peer_id: None,
            connected_at: Instant::now(),
        }
    }

    /// Attach the peer ID of a dialed connection.
    pub fn with_peer_id(mut self, peer_id: impl Into<String>) -> Self {
        self.peer_id = Some(peer_id.into());
        self
    }

    /// Check if this is an outbound connection.
    pub fn is_outbound(&self) -> bool {
        self.direction == ConnectionDirection::Outbound
    }

    /// Check if this is an inbound connection.
    pub fn is_inbound(&self) -> bool {
        self.direction == ConnectionDirection::Inbound
    }

    /// Get the connection duration.
    pub fn connection_duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {}, peer={})",
            self.id,
            self.addr,
            self.direction,
            self.peer_id.as_deref().unwrap_or("?")
        )
    }
}
