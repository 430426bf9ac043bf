//! Settlement gateway abstraction.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LedgerResult;

/// Where a ledger user accepts trustline connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeeringInfo {
    /// IP address or hostname.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl PeeringInfo {
    /// Build peering info from a socket address.
    pub fn from_addr(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }

    /// Socket address, if `host` is a literal IP.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.host
            .parse::<IpAddr>()
            .ok()
            .map(|ip| SocketAddr::new(ip, self.port))
    }
}

/// A user as listed by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Current ledger balance.
    #[serde(default, alias = "amount")]
    pub balance: u64,
    /// Network address of the user's node.
    pub peering_info: PeeringInfo,
}

/// The external ledger used to settle trustline debt with real value.
///
/// Only `pay_user` is used by the trustline state manager; the remaining
/// operations serve startup and the operator console.
#[async_trait]
pub trait SettlementGateway: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Register this node's account. Called once at startup.
    async fn register_user(
        &self,
        id: &str,
        initial_balance: u64,
        credential: &str,
        addr: SocketAddr,
    ) -> LedgerResult<()>;

    /// Transfer `amount` from `sender` to `receiver`.
    async fn pay_user(
        &self,
        sender: &str,
        receiver: &str,
        credential: &str,
        amount: u64,
    ) -> LedgerResult<()>;

    /// List every registered user.
    async fn list_users(&self) -> LedgerResult<BTreeMap<String, UserRecord>>;

    /// Remove every user. Administrative only.
    async fn delete_all_users(&self) -> LedgerResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peering_info_addr() {
        let info = PeeringInfo::from_addr("127.0.0.1:12345".parse().unwrap());
        assert_eq!(info.host, "127.0.0.1");
        assert_eq!(info.socket_addr(), Some("127.0.0.1:12345".parse().unwrap()));

        let named = PeeringInfo {
            host: "example.org".to_string(),
            port: 1,
        };
        assert_eq!(named.socket_addr(), None);
    }

    #[test]
    fn test_user_record_accepts_amount_alias() {
        let json = r#"{"amount": 50, "peering_info": {"host": "10.0.0.1", "port": 9}}"#;
        let record: UserRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.balance, 50);
        assert_eq!(record.peering_info.port, 9);
    }
}
