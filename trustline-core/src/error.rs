//! Error types for the trustline core crate.

use std::fmt;

/// Errors related to serialization and deserialization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SerializationError {
    /// Failed to encode data to bytes.
    EncodeFailed(String),
    /// Failed to decode data from bytes.
    DecodeFailed(String),
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializationError::EncodeFailed(msg) => write!(f, "encode failed: {}", msg),
            SerializationError::DecodeFailed(msg) => write!(f, "decode failed: {}", msg),
        }
    }
}

impl std::error::Error for SerializationError {}

/// Errors raised when a trustline mutation would break its invariants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BalanceError {
    /// The resulting balance would fall outside `[-limit, limit]`.
    LimitExceeded {
        /// Balance before the mutation.
        balance: i64,
        /// Requested amount.
        amount: u64,
        /// Configured trustline limit.
        limit: u64,
    },
    /// The amount does not fit the signed balance range.
    InvalidAmount(u64),
}

impl fmt::Display for BalanceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalanceError::LimitExceeded { balance, amount, limit } => write!(
                f,
                "moving {} from balance {} exceeds trustline limit {}",
                amount, balance, limit
            ),
            BalanceError::InvalidAmount(amount) => write!(f, "invalid amount {}", amount),
        }
    }
}

impl std::error::Error for BalanceError {}
