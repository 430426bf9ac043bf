//! Ledger error types.

use thiserror::Error;

/// Errors returned by a settlement gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Transport-level failure talking to the ledger service.
    #[error("ledger request failed: {0}")]
    Http(String),

    /// The ledger answered with a non-success status.
    #[error("ledger rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// The ledger answered with a body we could not interpret.
    #[error("invalid ledger response: {0}")]
    InvalidResponse(String),

    /// No account with this ID exists on the ledger.
    #[error("unknown ledger user: {0}")]
    UnknownUser(String),

    /// The credential does not match the account.
    #[error("credential rejected for {0}")]
    Unauthorized(String),

    /// The paying account cannot cover the amount.
    #[error("insufficient ledger funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: u64, available: u64 },

    /// An account with this ID already exists.
    #[error("ledger user already registered: {0}")]
    AlreadyRegistered(String),
}

impl From<reqwest::Error> for LedgerError {
    fn from(err: reqwest::Error) -> Self {
        LedgerError::Http(err.to_string())
    }
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;
