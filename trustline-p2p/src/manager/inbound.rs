//! Inbound connection listener.

use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::host::HostSender;
use crate::peer::{spawn_connection, ConnectionDirection, ConnectionInfo};

/// Run the inbound listener task.
///
/// Every accepted connection is registered with Host unidentified; the peer
/// names itself in its proposal.
pub async fn run_listener(listener: TcpListener, host: HostSender, mut shutdown_rx: mpsc::Receiver<()>) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::info!("Inbound listener shutting down");
                break;
            }

            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            tracing::warn!(addr = %addr, error = %e, "Failed to set TCP_NODELAY");
                        }

                        let id = host.next_connection_id();
                        tracing::debug!(addr = %addr, conn = %id, "Accepted inbound connection");

                        let info = ConnectionInfo::new(id, addr, ConnectionDirection::Inbound);
                        if let Err(e) = spawn_connection(info, stream, host.clone()).await {
                            tracing::info!(error = %e, "Host stopped, closing listener");
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Error accepting connection");
                    }
                }
            }
        }
    }
}
