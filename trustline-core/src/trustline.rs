//! Bilateral trustline balances.
//!
//! A trustline is seen from the local node: `host_balance` is what the peer
//! owes us (negative when we owe the peer) and `peer_balance` is the same
//! position seen from the peer. The two always sum to zero and neither may
//! leave `[-limit, limit]`. Every mutation is checked before it is applied,
//! so a refused mutation leaves the trustline untouched.

use serde::{Deserialize, Serialize};

use crate::error::BalanceError;

/// Balances of one trustline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trustline {
    host_balance: i64,
    peer_balance: i64,
    limit: u64,
}

impl Trustline {
    /// Create a zeroed trustline with the given limit.
    pub fn new(limit: u64) -> Self {
        Self {
            host_balance: 0,
            peer_balance: 0,
            limit,
        }
    }

    /// Our side of the line.
    pub fn host_balance(&self) -> i64 {
        self.host_balance
    }

    /// The peer's side of the line (credit we have extended when positive).
    pub fn peer_balance(&self) -> i64 {
        self.peer_balance
    }

    /// Configured limit.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Amount we currently owe the peer.
    pub fn debt(&self) -> u64 {
        if self.host_balance < 0 {
            self.host_balance.unsigned_abs()
        } else {
            0
        }
    }

    /// Whether the zero-sum and limit invariants hold.
    pub fn is_consistent(&self) -> bool {
        self.host_balance.checked_add(self.peer_balance) == Some(0)
            && self.host_balance.unsigned_abs() <= self.limit
            && self.peer_balance.unsigned_abs() <= self.limit
    }

    /// Host balance after crediting `amount`, without applying it.
    pub fn check_credit(&self, amount: u64) -> Result<i64, BalanceError> {
        self.shifted(amount, true)
    }

    /// Host balance after debiting `amount`, without applying it.
    pub fn check_debit(&self, amount: u64) -> Result<i64, BalanceError> {
        self.shifted(amount, false)
    }

    /// `host += amount; peer -= amount` (inbound Pay, outbound Settle).
    pub fn credit(&mut self, amount: u64) -> Result<(), BalanceError> {
        let host = self.check_credit(amount)?;
        self.set_host(host);
        Ok(())
    }

    /// `host -= amount; peer += amount` (outbound Pay, inbound Settle).
    pub fn debit(&mut self, amount: u64) -> Result<(), BalanceError> {
        let host = self.check_debit(amount)?;
        self.set_host(host);
        Ok(())
    }

    fn set_host(&mut self, host: i64) {
        self.host_balance = host;
        self.peer_balance = -host;
    }

    fn shifted(&self, amount: u64, credit: bool) -> Result<i64, BalanceError> {
        let signed = i64::try_from(amount).map_err(|_| BalanceError::InvalidAmount(amount))?;
        let next = if credit {
            self.host_balance.checked_add(signed)
        } else {
            self.host_balance.checked_sub(signed)
        };

        let limit_exceeded = BalanceError::LimitExceeded {
            balance: self.host_balance,
            amount,
            limit: self.limit,
        };
        match next {
            // i64::MIN has no positive mirror for the peer side.
            Some(host) if host != i64::MIN && host.unsigned_abs() <= self.limit => Ok(host),
            _ => Err(limit_exceeded),
        }
    }
}
