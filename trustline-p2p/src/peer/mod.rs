//! Peer connection management.
//!
//! This module provides:
//! - Connection identification and metadata
//! - Connection state machine
//! - Per-connection reader/writer tasks

pub mod connection;
pub mod info;
pub mod state;

pub use connection::{spawn_connection, Connection, ConnectionHandle};
pub use info::{ConnectionDirection, ConnectionId, ConnectionInfo};
pub use state::ConnectionState;
