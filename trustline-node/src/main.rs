//! Trustline node binary.
//!
//! Registers the operator's account on the ledger, listens for peers and
//! runs the interactive console.

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use trustline_node::cli::Cli;
use trustline_node::config::{resolve_advertised_ip, NodeConfig};
use trustline_node::console::{read_password, Console, ExitReason};
use trustline_p2p::TrustlineNode;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Logs go to stderr so they stay out of the console output
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    tracing::info!("Trustline Node v{}", env!("CARGO_PKG_VERSION"));

    let config = NodeConfig::from_cli(&cli);
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    let credential = match &config.password {
        Some(password) => password.clone(),
        None => read_password(&config.name, &mut input).await?,
    };
    let advertised_ip = resolve_advertised_ip(config.local).await?;
    let gateway = config.gateway()?;

    let mut node = TrustlineNode::start(config.host_config(credential, advertised_ip), gateway.clone())
        .await
        .context("failed to start trustline node")?;
    println!(
        "User {} registered on the ledger, listening on {} (advertised as {})",
        config.name,
        node.local_addr(),
        node.advertised_addr()
    );

    let proposals = node
        .take_proposals()
        .context("proposal notices already taken")?;
    let console = Console::new(config.name.as_str(), node.handle(), gateway);
    let reason = console.run(&mut input, proposals).await;

    match &reason {
        Ok(ExitReason::Command) => {}
        Ok(ExitReason::EndOfInput) => tracing::info!("Input closed, shutting down"),
        Ok(ExitReason::Signal) => tracing::info!("Shutting down without settling"),
        Err(e) => tracing::error!(error = %e, "Console failed"),
    }

    node.shutdown().await;
    reason.map(|_| ())
}
