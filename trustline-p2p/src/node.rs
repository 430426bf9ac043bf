//! Node bootstrap: listener, ledger registration and the Host task.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use trustline_ledger::SettlementGateway;

use crate::config::HostConfig;
use crate::error::P2pResult;
use crate::host::{Host, HostHandle, ProposalNotice};
use crate::manager::run_listener;

/// A running trustline node.
pub struct TrustlineNode {
    handle: HostHandle,
    local_addr: SocketAddr,
    advertised_addr: SocketAddr,
    proposals: Option<mpsc::UnboundedReceiver<ProposalNotice>>,
    host_task: JoinHandle<()>,
    listener_task: JoinHandle<()>,
    listener_shutdown: mpsc::Sender<()>,
}

impl TrustlineNode {
    /// Bind the listener, register with the ledger and start the Host.
    ///
    /// Failing to bind or to register is fatal and returned as an error.
    pub async fn start(config: HostConfig, gateway: Arc<dyn SettlementGateway>) -> P2pResult<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let advertised_addr = match config.advertised_addr {
            // An ephemeral bind publishes the port the OS picked.
            Some(addr) if addr.port() == 0 => SocketAddr::new(addr.ip(), local_addr.port()),
            Some(addr) => addr,
            None => local_addr,
        };
        tracing::info!(addr = %local_addr, advertised = %advertised_addr, "Trustline node listening");

        gateway
            .register_user(&config.name, config.ledger_balance, &config.credential, advertised_addr)
            .await?;
        tracing::info!(
            name = %config.name,
            ledger = gateway.name(),
            balance = config.ledger_balance,
            "Registered with ledger"
        );

        let (host, handle, proposals) = Host::new(config, gateway);
        let host_task = tokio::spawn(host.run());

        let (listener_shutdown, shutdown_rx) = mpsc::channel(1);
        let listener_task = tokio::spawn(run_listener(listener, handle.host_sender(), shutdown_rx));

        Ok(Self {
            handle,
            local_addr,
            advertised_addr,
            proposals: Some(proposals),
            host_task,
            listener_task,
            listener_shutdown,
        })
    }

    /// Handle for issuing commands to the Host.
    pub fn handle(&self) -> HostHandle {
        self.handle.clone()
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address published to the ledger.
    pub fn advertised_addr(&self) -> SocketAddr {
        self.advertised_addr
    }

    /// Take the proposal notice stream. Returns `None` after the first call.
    pub fn take_proposals(&mut self) -> Option<mpsc::UnboundedReceiver<ProposalNotice>> {
        self.proposals.take()
    }

    /// Stop accepting connections, close every connection and wait for the Host.
    pub async fn shutdown(self) {
        let _ = self.listener_shutdown.send(()).await;
        if let Err(e) = self.handle.shutdown().await {
            tracing::debug!(error = %e, "Host already stopped");
        }

        if let Err(e) = self.host_task.await {
            tracing::warn!(error = %e, "Host task failed");
        }
        if let Err(e) = self.listener_task.await {
            tracing::warn!(error = %e, "Listener task failed");
        }
        tracing::info!("Trustline node stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::P2pError;
    use trustline_ledger::{LedgerError, MemoryLedger};

    fn config(name: &str) -> HostConfig {
        HostConfig::new(name, "127.0.0.1:0".parse().unwrap())
            .with_ledger_balance(100)
            .with_credential("pw")
    }

    #[tokio::test]
    async fn test_start_registers_with_ledger() {
        let ledger = Arc::new(MemoryLedger::new());
        let node = TrustlineNode::start(config("alice"), ledger.clone()).await.unwrap();

        assert_ne!(node.local_addr().port(), 0);
        assert_eq!(node.advertised_addr(), node.local_addr());

        let users = ledger.list_users().await.unwrap();
        assert_eq!(users["alice"].balance, 100);
        assert_eq!(users["alice"].peering_info.socket_addr(), Some(node.local_addr()));

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_advertised_addr_takes_bound_port() {
        let ledger = Arc::new(MemoryLedger::new());
        let config = config("alice").with_advertised_addr("203.0.113.7:0".parse().unwrap());
        let node = TrustlineNode::start(config, ledger.clone()).await.unwrap();

        let advertised = node.advertised_addr();
        assert_eq!(advertised.ip().to_string(), "203.0.113.7");
        assert_eq!(advertised.port(), node.local_addr().port());

        let users = ledger.list_users().await.unwrap();
        assert_eq!(users["alice"].peering_info.socket_addr(), Some(advertised));

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_registration_failure_is_fatal() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger
            .register_user("alice", 1, "pw", "127.0.0.1:1".parse().unwrap())
            .await
            .unwrap();

        let result = TrustlineNode::start(config("alice"), ledger).await;
        assert!(matches!(
            result,
            Err(P2pError::Ledger(LedgerError::AlreadyRegistered(_)))
        ));
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        let config = HostConfig::new("alice", addr);
        let result = TrustlineNode::start(config, Arc::new(MemoryLedger::new())).await;
        assert!(matches!(result, Err(P2pError::Io(_))));
    }
}
