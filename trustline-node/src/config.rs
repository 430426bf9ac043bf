//! Node configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use trustline_ledger::{HttpLedger, MemoryLedger, SettlementGateway};
use trustline_p2p::{HostConfig, ProposalPolicy, DEFAULT_PORT, DEFAULT_TRUSTLINE_LIMIT};

use crate::cli::Cli;

/// Public IP lookup used when the node is not local-only.
pub const IPIFY_URL: &str = "https://api.ipify.org?format=text";

const IP_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Which ledger the node settles on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerTarget {
    /// In-process ledger, visible to this node only.
    Memory,
    /// REST ledger service at the given base URL.
    Http(String),
}

impl LedgerTarget {
    fn parse(url: &str) -> Self {
        if url.eq_ignore_ascii_case("memory") {
            LedgerTarget::Memory
        } else {
            LedgerTarget::Http(url.to_string())
        }
    }
}

/// Complete node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Peer ID, also the ledger account name.
    pub name: String,

    /// Initial ledger balance.
    pub balance: u64,

    /// Listening port.
    pub port: u16,

    /// Localhost-only mode.
    pub local: bool,

    pub ledger: LedgerTarget,

    /// Trustline limit.
    pub limit: u64,

    /// Ledger password, if given on the command line.
    pub password: Option<String>,

    /// How incoming proposals are decided.
    pub proposal_policy: ProposalPolicy,

    /// Log level.
    pub log_level: String,
}

impl NodeConfig {
    /// Create a node configuration from CLI arguments.
    pub fn from_cli(cli: &Cli) -> Self {
        let proposal_policy = if cli.auto_accept {
            ProposalPolicy::AcceptAll
        } else {
            ProposalPolicy::Manual
        };

        Self {
            name: cli.name.clone(),
            balance: cli.balance,
            port: cli.port,
            local: cli.local,
            ledger: LedgerTarget::parse(&cli.ledger_url),
            limit: cli.limit,
            password: cli.password.clone(),
            proposal_policy,
            log_level: cli.log_level.clone(),
        }
    }

    /// Listen on loopback in local mode, on every interface otherwise.
    pub fn bind_addr(&self) -> SocketAddr {
        let ip = if self.local {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        };
        SocketAddr::new(ip, self.port)
    }

    /// Build the Host configuration once the credential and public IP are known.
    pub fn host_config(&self, credential: impl Into<String>, advertised_ip: IpAddr) -> HostConfig {
        HostConfig::new(self.name.as_str(), self.bind_addr())
            .with_advertised_addr(SocketAddr::new(advertised_ip, self.port))
            .with_trustline_limit(self.limit)
            .with_ledger_balance(self.balance)
            .with_credential(credential)
            .with_proposal_policy(self.proposal_policy)
    }

    /// Construct the settlement gateway.
    pub fn gateway(&self) -> anyhow::Result<Arc<dyn SettlementGateway>> {
        match &self.ledger {
            LedgerTarget::Memory => {
                tracing::warn!("Using an in-process ledger, peers cannot see this node's account");
                Ok(Arc::new(MemoryLedger::new()))
            }
            LedgerTarget::Http(url) => {
                let ledger = HttpLedger::new(url.as_str())
                    .with_context(|| format!("failed to create ledger client for {}", url))?;
                Ok(Arc::new(ledger))
            }
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            balance: 0,
            port: DEFAULT_PORT,
            local: false,
            ledger: LedgerTarget::Memory,
            limit: DEFAULT_TRUSTLINE_LIMIT,
            password: None,
            proposal_policy: ProposalPolicy::Manual,
            log_level: "info".to_string(),
        }
    }
}

/// Address peers should dial: loopback when local, otherwise our public IP.
pub async fn resolve_advertised_ip(local: bool) -> anyhow::Result<IpAddr> {
    if local {
        tracing::info!("Running with localhost only");
        return Ok(IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    tracing::info!(url = IPIFY_URL, "Looking up public IP address");
    let client = reqwest::Client::builder().timeout(IP_LOOKUP_TIMEOUT).build()?;
    let body = client
        .get(IPIFY_URL)
        .send()
        .await
        .context("public IP lookup failed")?
        .error_for_status()
        .context("public IP lookup failed")?
        .text()
        .await?;

    body.trim()
        .parse()
        .with_context(|| format!("public IP lookup returned {:?}", body.trim()))
}
