//! Payment splitting.
//!
//! A payment that would push the peer's extended credit past the limit is
//! broken into: saturate the line, settle the full limit on the ledger,
//! then pay the remainder. Steps are applied one at a time through the
//! normal outbound path with no rollback across steps.

use std::fmt;

use trustline_core::Message;

use crate::error::{HostError, HostResult};

/// One step of a planned payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStep {
    /// Off-ledger payment.
    Pay(u64),
    /// Ledger settlement of accumulated debt.
    Settle(u64),
}

impl PaymentStep {
    /// Build the wire message for this step.
    pub fn to_message(&self, sender_id: &str, peer_id: &str) -> Message {
        match self {
            PaymentStep::Pay(amount) => Message::pay(sender_id, peer_id, *amount),
            PaymentStep::Settle(amount) => Message::settle(sender_id, peer_id, *amount),
        }
    }
}

impl fmt::Display for PaymentStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStep::Pay(amount) => write!(f, "pay({})", amount),
            PaymentStep::Settle(amount) => write!(f, "settle({})", amount),
        }
    }
}

/// Plan a payment of `amount` given the peer's current balance and the limit.
pub fn plan_payment(peer_balance: i64, limit: u64, amount: u64) -> HostResult<Vec<PaymentStep>> {
    if amount == 0 {
        return Err(HostError::InvalidAmount {
            amount,
            reason: "payment must be positive",
        });
    }

    let peer = i128::from(peer_balance);
    let limit_wide = i128::from(limit);
    let total = peer + i128::from(amount);

    if total <= limit_wide {
        return Ok(vec![PaymentStep::Pay(amount)]);
    }

    let remainder = total - limit_wide;
    if remainder > limit_wide {
        return Err(HostError::InsufficientCredit(format!(
            "payment of {} leaves {} after settling, above limit {}",
            amount, remainder, limit
        )));
    }

    let saturate = limit_wide - peer;
    let mut steps = Vec::with_capacity(3);
    if saturate > 0 {
        steps.push(PaymentStep::Pay(to_amount(saturate)?));
    }
    steps.push(PaymentStep::Settle(limit));
    steps.push(PaymentStep::Pay(to_amount(remainder)?));

    Ok(steps)
}

fn to_amount(value: i128) -> HostResult<u64> {
    u64::try_from(value).map_err(|_| HostError::InvalidAmount {
        amount: 0,
        reason: "step out of range",
    })
}
