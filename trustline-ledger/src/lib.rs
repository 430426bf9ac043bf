//! Settlement ledger access for trustline nodes.
//!
//! Trustline debt is settled with real value on an external ledger. This
//! crate provides the [`SettlementGateway`] trait the state manager talks to,
//! plus two implementations:
//!
//! - [`HttpLedger`] - JSON-over-HTTP client for the ledger REST service
//! - [`MemoryLedger`] - in-process ledger for tests and local networks

pub mod error;
pub mod gateway;
pub mod http;
pub mod memory;

pub use error::{LedgerError, LedgerResult};
pub use gateway::{PeeringInfo, SettlementGateway, UserRecord};
pub use http::HttpLedger;
pub use memory::MemoryLedger;
