//! In-process ledger.
//!
//! Keeps accounts in memory with the same checks the REST service applies.
//! Several nodes in one process can share a single instance through an
//! `Arc`, which is how the integration tests run.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{LedgerError, LedgerResult};
use crate::gateway::{PeeringInfo, SettlementGateway, UserRecord};

#[derive(Debug, Clone)]
struct Account {
    balance: u64,
    credential: String,
    addr: SocketAddr,
}

/// Ledger that lives in process memory.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    accounts: Mutex<BTreeMap<String, Account>>,
}

impl MemoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current balance of `id`, if registered.
    pub async fn balance_of(&self, id: &str) -> Option<u64> {
        self.accounts.lock().await.get(id).map(|a| a.balance)
    }

    /// Number of registered users.
    pub async fn len(&self) -> usize {
        self.accounts.lock().await.len()
    }

    /// Whether no users are registered.
    pub async fn is_empty(&self) -> bool {
        self.accounts.lock().await.is_empty()
    }
}

#[async_trait]
impl SettlementGateway for MemoryLedger {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn register_user(
        &self,
        id: &str,
        initial_balance: u64,
        credential: &str,
        addr: SocketAddr,
    ) -> LedgerResult<()> {
        let mut accounts = self.accounts.lock().await;
        if accounts.contains_key(id) {
            return Err(LedgerError::AlreadyRegistered(id.to_string()));
        }

        accounts.insert(
            id.to_string(),
            Account {
                balance: initial_balance,
                credential: credential.to_string(),
                addr,
            },
        );
        tracing::debug!(user = id, balance = initial_balance, "Ledger user registered");
        Ok(())
    }

    async fn pay_user(
        &self,
        sender: &str,
        receiver: &str,
        credential: &str,
        amount: u64,
    ) -> LedgerResult<()> {
        let mut accounts = self.accounts.lock().await;

        if !accounts.contains_key(receiver) {
            return Err(LedgerError::UnknownUser(receiver.to_string()));
        }
        let from = accounts
            .get_mut(sender)
            .ok_or_else(|| LedgerError::UnknownUser(sender.to_string()))?;
        if from.credential != credential {
            return Err(LedgerError::Unauthorized(sender.to_string()));
        }
        if from.balance < amount {
            return Err(LedgerError::InsufficientFunds {
                requested: amount,
                available: from.balance,
            });
        }
        from.balance -= amount;

        if let Some(to) = accounts.get_mut(receiver) {
            to.balance = to.balance.saturating_add(amount);
        }
        tracing::debug!(sender, receiver, amount, "Ledger payment");
        Ok(())
    }

    async fn list_users(&self) -> LedgerResult<BTreeMap<String, UserRecord>> {
        let accounts = self.accounts.lock().await;
        Ok(accounts
            .iter()
            .map(|(id, account)| {
                (
                    id.clone(),
                    UserRecord {
                        balance: account.balance,
                        peering_info: PeeringInfo::from_addr(account.addr),
                    },
                )
            })
            .collect())
    }

    async fn delete_all_users(&self) -> LedgerResult<()> {
        self.accounts.lock().await.clear();
        Ok(())
    }
}
