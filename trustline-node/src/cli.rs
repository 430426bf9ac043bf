//! Command-line argument parsing.

use clap::Parser;

use trustline_p2p::{DEFAULT_PORT, DEFAULT_TRUSTLINE_LIMIT};

/// Off-ledger trustline payment node.
#[derive(Parser, Debug, Clone)]
#[command(name = "trustline-node")]
#[command(about = "Trustline payment node: pay peers off-ledger, settle on the ledger")]
#[command(version)]
pub struct Cli {
    /// Peer ID to register on the ledger.
    pub name: String,

    /// Initial ledger balance.
    pub balance: u64,

    /// Port for receiving peer connections.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Only accept localhost connections and advertise 127.0.0.1.
    #[arg(short, long)]
    pub local: bool,

    /// Ledger REST endpoint, or "memory" for an in-process ledger.
    #[arg(long, default_value = "http://127.0.0.1:5000")]
    pub ledger_url: String,

    /// Trustline limit applied to every trustline.
    #[arg(long, default_value_t = DEFAULT_TRUSTLINE_LIMIT)]
    pub limit: u64,

    /// Ledger account password (prompted when omitted).
    #[arg(long)]
    pub password: Option<String>,

    /// Accept every trustline proposal without asking.
    #[arg(long)]
    pub auto_accept: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
