//! Interactive operator console.
//!
//! Each line read from stdin is parsed into a [`Command`] and turned into
//! one request on the Host handle (or a ledger query for `users`,
//! `delete` and address lookup in `propose`). Proposal notices from the
//! Host are printed as they arrive so the operator can answer `y`/`n`.

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use thiserror::Error;
use tokio::io::{AsyncBufRead, Lines};
use tokio::sync::mpsc;

use trustline_ledger::SettlementGateway;
use trustline_p2p::{HostHandle, HostSnapshot, ProposalNotice, SettleReport};

use crate::shutdown::wait_for_shutdown_signal;

pub const USAGE: &str = "\
Command options:
pay <peerID> <amount> - pay peerID the amount over the trustline
settle <peerID> <amount> - settle amount of your debt with peerID on the ledger
propose <peerID> - propose a trustline to peerID
balance - show each trustline balance
users - list ledger users
delete - delete all ledger users
y / n - accept or reject the oldest trustline proposal
exit - settle as much debt as possible and exit
help - show this message";

/// A parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Pay { peer_id: String, amount: u64 },
    Settle { peer_id: String, amount: u64 },
    Propose { peer_id: String },
    Balance,
    Users,
    Delete,
    /// `y`
    Accept,
    /// `n`
    Reject,
    Exit,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty command")]
    Empty,

    #[error("unknown command {0:?}")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("invalid amount {0:?}")]
    InvalidAmount(String),
}

impl Command {
    /// Parse one input line.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&name, args)) = words.split_first() else {
            return Err(ParseError::Empty);
        };

        match name {
            "pay" => match args {
                [peer_id, amount] => Ok(Command::Pay {
                    peer_id: peer_id.to_string(),
                    amount: parse_amount(amount)?,
                }),
                _ => Err(ParseError::Usage("pay <peerID> <amount>")),
            },
            "settle" => match args {
                [peer_id, amount] => Ok(Command::Settle {
                    peer_id: peer_id.to_string(),
                    amount: parse_amount(amount)?,
                }),
                _ => Err(ParseError::Usage("settle <peerID> <amount>")),
            },
            "propose" => match args {
                [peer_id] => Ok(Command::Propose {
                    peer_id: peer_id.to_string(),
                }),
                _ => Err(ParseError::Usage("propose <peerID>")),
            },
            "balance" => Ok(Command::Balance),
            "users" => Ok(Command::Users),
            "delete" => Ok(Command::Delete),
            "y" => Ok(Command::Accept),
            "n" => Ok(Command::Reject),
            "exit" => Ok(Command::Exit),
            "help" => Ok(Command::Help),
            other => Err(ParseError::Unknown(other.to_string())),
        }
    }
}

fn parse_amount(word: &str) -> Result<u64, ParseError> {
    word.parse()
        .map_err(|_| ParseError::InvalidAmount(word.to_string()))
}

/// Why the console loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The operator typed `exit`.
    Command,
    /// Stdin closed.
    EndOfInput,
    /// SIGINT or SIGTERM.
    Signal,
}

pub struct Console {
    name: String,
    handle: HostHandle,
    gateway: Arc<dyn SettlementGateway>,
}

impl Console {
    pub fn new(name: impl Into<String>, handle: HostHandle, gateway: Arc<dyn SettlementGateway>) -> Self {
        Self {
            name: name.into(),
            handle,
            gateway,
        }
    }

    /// Read commands until `exit`, end of input or a shutdown signal.
    pub async fn run<R>(
        &self,
        input: &mut Lines<R>,
        mut proposals: mpsc::UnboundedReceiver<ProposalNotice>,
    ) -> anyhow::Result<ExitReason>
    where
        R: AsyncBufRead + Unpin,
    {
        let signal = wait_for_shutdown_signal();
        tokio::pin!(signal);

        println!("Type help for the list of commands.");
        prompt();

        loop {
            tokio::select! {
                line = input.next_line() => {
                    let Some(line) = line? else {
                        return Ok(ExitReason::EndOfInput);
                    };

                    match Command::parse(&line) {
                        Ok(command) => {
                            println!("{}", self.execute(&command).await);
                            if command == Command::Exit {
                                return Ok(ExitReason::Command);
                            }
                        }
                        Err(ParseError::Empty) => {}
                        Err(e @ ParseError::Unknown(_)) => println!("Err: {}\n{}", e, USAGE),
                        Err(e) => println!("Err: {}", e),
                    }
                    prompt();
                }
                Some(notice) = proposals.recv() => {
                    println!("\n{} is trying to open a trustline. Accept? [y/n]", notice.peer_id);
                    prompt();
                }
                _ = &mut signal => return Ok(ExitReason::Signal),
            }
        }
    }

    /// Execute one command and return the text to show the operator.
    pub async fn execute(&self, command: &Command) -> String {
        match self.try_execute(command).await {
            Ok(output) => output,
            Err(e) => format!("Err: {:#}", e),
        }
    }

    async fn try_execute(&self, command: &Command) -> anyhow::Result<String> {
        match command {
            Command::Pay { peer_id, amount } => {
                let steps = self.handle.pay(peer_id.as_str(), *amount).await?;
                if steps.len() == 1 {
                    Ok(format!("Paid {} to {}", amount, peer_id))
                } else {
                    let steps: Vec<String> = steps.iter().map(ToString::to_string).collect();
                    Ok(format!("Paid {} to {} as {}", amount, peer_id, steps.join(", ")))
                }
            }
            Command::Settle { peer_id, amount } => {
                self.handle.settle(peer_id.as_str(), *amount).await?;
                Ok(format!("Settled {} with {} on the ledger", amount, peer_id))
            }
            Command::Propose { peer_id } => self.propose(peer_id).await,
            Command::Balance => {
                let snapshot = self.handle.snapshot().await?;
                Ok(render_balances(&snapshot))
            }
            Command::Users => self.users().await,
            Command::Delete => {
                self.gateway.delete_all_users().await?;
                Ok("Deleted all ledger users".to_string())
            }
            Command::Accept => {
                let peer_id = self.handle.accept().await?;
                Ok(format!("Trustline with {} is open", peer_id))
            }
            Command::Reject => {
                let peer_id = self.handle.reject().await?;
                Ok(format!("Rejected trustline proposal from {}", peer_id))
            }
            Command::Exit => {
                let report = self.handle.settle_all().await?;
                Ok(render_settle_report(&report))
            }
            Command::Help => Ok(USAGE.to_string()),
        }
    }

    async fn propose(&self, peer_id: &str) -> anyhow::Result<String> {
        if peer_id == self.name {
            anyhow::bail!("cannot open a trustline with yourself");
        }

        let users = self.gateway.list_users().await?;
        let user = users
            .get(peer_id)
            .with_context(|| format!("{} is not registered on the ledger", peer_id))?;
        let addr = user.peering_info.socket_addr().with_context(|| {
            format!(
                "{} has no usable address ({}:{})",
                peer_id, user.peering_info.host, user.peering_info.port
            )
        })?;

        self.handle.propose(peer_id, addr).await?;
        Ok(format!("Proposal sent to {} at {}", peer_id, addr))
    }

    async fn users(&self) -> anyhow::Result<String> {
        let users = self.gateway.list_users().await?;
        if users.is_empty() {
            return Ok("No users registered".to_string());
        }

        let lines: Vec<String> = users
            .iter()
            .map(|(id, user)| {
                format!(
                    "{}: {} ({}:{})",
                    id, user.balance, user.peering_info.host, user.peering_info.port
                )
            })
            .collect();
        Ok(lines.join("\n"))
    }
}

/// One `peer: host_balance` line per identified connection, then the total.
pub fn render_balances(snapshot: &HostSnapshot) -> String {
    let mut lines: Vec<String> = snapshot
        .connections
        .iter()
        .filter_map(|c| {
            let peer_id = c.peer_id.as_deref()?;
            Some(match c.balances {
                Some((host, _)) => format!("{}: {}", peer_id, host),
                None => format!("{}: pending", peer_id),
            })
        })
        .collect();
    lines.push(format!("Total: {}", snapshot.total_host_balance()));
    lines.join("\n")
}

pub fn render_settle_report(report: &SettleReport) -> String {
    let mut lines = Vec::new();
    for (peer_id, amount) in &report.settled {
        lines.push(format!("Settled {} with {}", amount, peer_id));
    }
    for (peer_id, e) in &report.failed {
        lines.push(format!("Err: could not settle with {}: {}", peer_id, e));
    }
    lines.push("Exiting...".to_string());
    lines.join("\n")
}

/// Ask for the ledger password on the console.
pub async fn read_password<R>(name: &str, input: &mut Lines<R>) -> anyhow::Result<String>
where
    R: AsyncBufRead + Unpin,
{
    println!("Hi {}! We'll need a password for your ledger account.", name);
    print!("Password: ");
    std::io::stdout().flush()?;

    let line = input.next_line().await?.context("no password entered")?;
    let password = line.trim();
    if password.is_empty() {
        anyhow::bail!("password must not be empty");
    }
    Ok(password.to_string())
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}
