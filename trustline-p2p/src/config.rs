//! Host configuration.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Network magic bytes identifying the trustline protocol.
pub const NETWORK_MAGIC: [u8; 4] = *b"TRST";

/// Maximum payload size of a single frame (64 KiB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Default trustline limit.
pub const DEFAULT_TRUSTLINE_LIMIT: u64 = 100;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 12345;

/// Default timeout for dialing a peer.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the Host event queue.
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// How incoming trustline proposals are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProposalPolicy {
    /// Surface every proposal to the operator and wait for `accept`/`reject`.
    #[default]
    Manual,
    /// Accept every proposal immediately.
    AcceptAll,
    /// Reject every proposal immediately.
    RejectAll,
}

impl fmt::Display for ProposalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProposalPolicy::Manual => write!(f, "manual"),
            ProposalPolicy::AcceptAll => write!(f, "accept_all"),
            ProposalPolicy::RejectAll => write!(f, "reject_all"),
        }
    }
}

/// Configuration for a trustline host.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Node name; doubles as the peer ID other nodes address us by.
    pub name: String,

    /// Address to bind the listener to.
    pub bind_addr: SocketAddr,

    /// Address published to the ledger. Defaults to the bound address.
    pub advertised_addr: Option<SocketAddr>,

    /// Credit limit applied to every trustline.
    pub trustline_limit: u64,

    /// Ledger balance registered at startup.
    pub ledger_balance: u64,

    /// Ledger credential used to authorize settlements.
    pub credential: String,

    /// Timeout for establishing outbound connections.
    pub connect_timeout: Duration,

    /// How incoming proposals are resolved.
    pub proposal_policy: ProposalPolicy,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            advertised_addr: None,
            trustline_limit: DEFAULT_TRUSTLINE_LIMIT,
            ledger_balance: 0,
            credential: String::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            proposal_policy: ProposalPolicy::default(),
        }
    }
}

impl HostConfig {
    /// Create a new configuration with the given node name and bind address.
    pub fn new(name: impl Into<String>, bind_addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            bind_addr,
            ..Default::default()
        }
    }

    /// Set the address published to the ledger.
    pub fn with_advertised_addr(mut self, addr: SocketAddr) -> Self {
        self.advertised_addr = Some(addr);
        self
    }

    /// Set the trustline limit.
    pub fn with_trustline_limit(mut self, limit: u64) -> Self {
        self.trustline_limit = limit;
        self
    }

    /// Set the initial ledger balance.
    pub fn with_ledger_balance(mut self, balance: u64) -> Self {
        self.ledger_balance = balance;
        self
    }

    /// Set the ledger credential.
    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = credential.into();
        self
    }

    /// Set the connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the proposal policy.
    pub fn with_proposal_policy(mut self, policy: ProposalPolicy) -> Self {
        self.proposal_policy = policy;
        self
    }
}
