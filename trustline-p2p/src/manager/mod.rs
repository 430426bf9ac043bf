//! Connection table.
//!
//! Tracks every registered connection, the peer ID index over them, and
//! peers currently being dialed. Owned exclusively by Host.

pub mod inbound;
pub mod outbound;

use std::collections::HashMap;

use bytes::Bytes;

use crate::peer::{Connection, ConnectionId, ConnectionState};

pub use inbound::run_listener;
pub use outbound::connect_to_peer;

/// Registered connections and the peer ID index over them.
///
/// A connection is indexed iff it carries a peer ID; every indexed
/// connection is in the set.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    /// Every registered connection.
    connections: HashMap<ConnectionId, Connection>,
    /// Peer ID to connection.
    index: HashMap<String, ConnectionId>,
    /// Peers with a dial in flight, reserved until the connection registers.
    dialing: HashMap<String, ConnectionId>,
}

impl ConnectionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection, indexing it if it already carries a peer ID.
    ///
    /// Refused if the ID is taken or the peer ID is already indexed.
    pub fn insert(&mut self, connection: Connection) -> Result<(), Connection> {
        let id = connection.id();
        if self.connections.contains_key(&id) {
            return Err(connection);
        }
        if let Some(peer_id) = connection.peer_id() {
            if self.index.contains_key(peer_id) {
                return Err(connection);
            }
            self.index.insert(peer_id.to_string(), id);
        }
        self.connections.insert(id, connection);
        Ok(())
    }

    /// Remove a connection and its index entry. Idempotent.
    ///
    /// Dropping the returned record closes its outbound queue.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.dialing.retain(|_, dial| *dial != id);

        let mut connection = self.connections.remove(&id)?;
        if let Some(peer_id) = connection.peer_id() {
            if self.index.get(peer_id) == Some(&id) {
                self.index.remove(peer_id);
            }
        }
        connection.transition_to(ConnectionState::Closed);
        Some(connection)
    }

    /// Identify a connection and index it under `peer_id`.
    pub fn assign_peer_id(&mut self, id: ConnectionId, peer_id: &str) -> bool {
        if peer_id.is_empty() || self.index.contains_key(peer_id) {
            return false;
        }
        match self.connections.get_mut(&id) {
            Some(connection) if connection.peer_id().is_none() => {
                connection.set_peer_id(peer_id.to_string());
                self.index.insert(peer_id.to_string(), id);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    /// Look up a connection by peer ID.
    pub fn by_peer(&self, peer_id: &str) -> Option<&Connection> {
        self.index.get(peer_id).and_then(|id| self.connections.get(id))
    }

    pub fn by_peer_mut(&mut self, peer_id: &str) -> Option<&mut Connection> {
        let id = *self.index.get(peer_id)?;
        self.connections.get_mut(&id)
    }

    /// Whether `peer_id` is indexed.
    pub fn contains_peer(&self, peer_id: &str) -> bool {
        self.index.contains_key(peer_id)
    }

    /// Queue a frame on a connection. Returns false if it is gone.
    pub fn send_to(&self, id: ConnectionId, frame: Bytes) -> bool {
        self.connections
            .get(&id)
            .map(|connection| connection.send(frame))
            .unwrap_or(false)
    }

    /// Iterate over all connections.
    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Indexed peer IDs, sorted.
    pub fn peer_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.index.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Reserve `peer_id` for a dial in flight on connection `id`.
    pub fn start_dialing(&mut self, peer_id: &str, id: ConnectionId) -> bool {
        if self.index.contains_key(peer_id) || self.dialing.contains_key(peer_id) {
            return false;
        }
        self.dialing.insert(peer_id.to_string(), id);
        true
    }

    /// Release the dial reservation for `peer_id`.
    pub fn stop_dialing(&mut self, peer_id: &str) {
        self.dialing.remove(peer_id);
    }

    pub fn is_dialing(&self, peer_id: &str) -> bool {
        self.dialing.contains_key(peer_id)
    }

    /// Check that the index and the connection set agree.
    pub fn is_consistent(&self) -> bool {
        let indexed_ok = self.index.iter().all(|(peer_id, id)| {
            self.connections
                .get(id)
                .map(|connection| connection.peer_id() == Some(peer_id.as_str()))
                .unwrap_or(false)
        });
        let identified = self
            .connections
            .values()
            .filter(|connection| connection.peer_id().is_some())
            .count();

        let none_closed = self
            .connections
            .values()
            .all(|connection| !connection.state().is_closed());

        indexed_ok && none_closed && identified == self.index.len()
    }

    /// Remove every connection, closing all outbound queues.
    pub fn clear(&mut self) -> Vec<Connection> {
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        let removed = ids.into_iter().filter_map(|id| self.remove(id)).collect();
        self.dialing.clear();
        removed
    }
}
