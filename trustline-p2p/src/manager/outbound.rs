//! Outbound connection dialing.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{P2pError, P2pResult};
use crate::host::HostSender;
use crate::peer::{spawn_connection, ConnectionDirection, ConnectionHandle, ConnectionId, ConnectionInfo};

/// Dial a peer and register the connection under its peer ID.
///
/// Host answers the registration by sending our proposal on it.
pub async fn connect_to_peer(
    id: ConnectionId,
    peer_id: String,
    addr: SocketAddr,
    connect_timeout: Duration,
    host: HostSender,
) -> P2pResult<ConnectionHandle> {
    tracing::debug!(addr = %addr, peer = %peer_id, conn = %id, "Connecting to peer");

    let stream = match timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(P2pError::Io(e)),
        Err(_) => return Err(P2pError::ConnectionTimeout { addr }),
    };

    if let Err(e) = stream.set_nodelay(true) {
        tracing::warn!(addr = %addr, error = %e, "Failed to set TCP_NODELAY");
    }

    let info = ConnectionInfo::new(id, addr, ConnectionDirection::Outbound).with_peer_id(peer_id);
    spawn_connection(info, stream, host).await
}
