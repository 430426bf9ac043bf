//! Peer-to-peer networking and state management for trustline nodes.
//!
//! This crate provides:
//!
//! - Length-prefixed framing of trustline messages
//! - Per-connection reader/writer tasks
//! - The Host: the single serializing owner of trustlines and connections
//! - Proposal negotiation and payment splitting
//!
//! # Architecture
//!
//! Every connection runs a reader task and a writer task. All state lives
//! in the Host task, which consumes one ordered event queue; nothing else
//! mutates trustlines or the connection index.
//!
//! ```text
//! Host Task (Host::run())
//! ├── Listener Task (accept incoming, register)
//! ├── Connection 1 Reader (decode -> proposal/inbound)
//! ├── Connection 1 Writer (drain outbound byte queue)
//! ├── ...
//! └── Dial Tasks (connect, register, then Host proposes)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use trustline_ledger::MemoryLedger;
//! use trustline_p2p::{HostConfig, TrustlineNode};
//!
//! let config = HostConfig::new("alice", "0.0.0.0:12345".parse()?).with_ledger_balance(500);
//! let node = TrustlineNode::start(config, Arc::new(MemoryLedger::new())).await?;
//! node.handle().pay("bob", 30).await?;
//! ```

pub mod config;
pub mod error;

pub mod protocol;
pub mod peer;
pub mod manager;
pub mod host;
pub mod node;

pub use config::{
    HostConfig, ProposalPolicy, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PORT, DEFAULT_TRUSTLINE_LIMIT,
    MAX_MESSAGE_SIZE, NETWORK_MAGIC,
};
pub use error::{HostError, HostResult, P2pError, P2pResult};
pub use host::{
    plan_payment, ConnectionSnapshot, Host, HostEvent, HostHandle, HostSender, HostSnapshot,
    PaymentStep, ProposalNotice, SettleReport,
};
pub use manager::ConnectionTable;
pub use node::TrustlineNode;
pub use peer::{ConnectionDirection, ConnectionId, ConnectionInfo, ConnectionState};
pub use protocol::{encode_frame, Message, MessageCodec, MessageKind};
