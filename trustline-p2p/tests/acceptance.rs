//! Acceptance tests for trustline nodes over real localhost TCP.
//!
//! These tests verify:
//! 1. Proposal accepted - both sides hold a zeroed trustline
//! 2. Manual decision - the operator resolves a queued proposal
//! 3. Rejection - the proposer's connection is removed on both sides
//! 4. Payments - balances mirror on both nodes
//! 5. Splitting - an over-limit payment settles through the ledger
//! 6. Malformed input - only the offending connection is dropped
//! 7. Disconnect - a stopped node is unregistered by its peers
//! 8. Dial failures and duplicate proposals

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

use trustline_ledger::{MemoryLedger, SettlementGateway};
use trustline_p2p::{HostConfig, HostError, HostHandle, ProposalPolicy, TrustlineNode};

/// Timeout for waiting on state to propagate between nodes.
const PROPAGATION_TIMEOUT_MS: u64 = 5000;

/// Poll interval for state checks.
const POLL_MS: u64 = 20;

/// Create a test node configuration with port 0 (OS assigns port).
fn test_config(name: &str, policy: ProposalPolicy) -> HostConfig {
    HostConfig::new(name, "127.0.0.1:0".parse().unwrap())
        .with_trustline_limit(100)
        .with_ledger_balance(500)
        .with_credential(format!("{}-secret", name))
        .with_connect_timeout(Duration::from_secs(2))
        .with_proposal_policy(policy)
}

async fn start_node(name: &str, policy: ProposalPolicy, ledger: &Arc<MemoryLedger>) -> TrustlineNode {
    TrustlineNode::start(test_config(name, policy), ledger.clone())
        .await
        .unwrap()
}

/// Poll until `condition` holds or the timeout elapses.
async fn wait_for<F, Fut>(timeout_ms: u64, poll_ms: u64, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    let timeout_duration = Duration::from_millis(timeout_ms);
    let poll_duration = Duration::from_millis(poll_ms);

    loop {
        if condition().await {
            return true;
        }
        if start.elapsed() > timeout_duration {
            return false;
        }
        sleep(poll_duration).await;
    }
}

async fn trustline(handle: &HostHandle, peer: &str) -> Option<(i64, i64)> {
    handle.snapshot().await.ok().and_then(|s| s.trustline(peer))
}

/// Wait until `handle`'s trustline with `peer` equals `expected`.
async fn wait_trustline(handle: &HostHandle, peer: &str, expected: Option<(i64, i64)>) -> bool {
    let handle = handle.clone();
    let peer = peer.to_string();
    wait_for(PROPAGATION_TIMEOUT_MS, POLL_MS, move || {
        let handle = handle.clone();
        let peer = peer.clone();
        async move { trustline(&handle, &peer).await == expected }
    })
    .await
}

/// Wait until `handle` holds exactly `count` connections.
async fn wait_connections(handle: &HostHandle, count: usize) -> bool {
    let handle = handle.clone();
    wait_for(PROPAGATION_TIMEOUT_MS, POLL_MS, move || {
        let handle = handle.clone();
        async move {
            handle
                .snapshot()
                .await
                .map(|s| s.connections.len() == count)
                .unwrap_or(false)
        }
    })
    .await
}

/// Open a trustline from `from` to `to` and wait until both sides see it.
async fn connect(from: &TrustlineNode, from_name: &str, to: &TrustlineNode, to_name: &str) {
    from.handle().propose(to_name, to.local_addr()).await.unwrap();
    assert!(wait_trustline(&from.handle(), to_name, Some((0, 0))).await);
    assert!(wait_trustline(&to.handle(), from_name, Some((0, 0))).await);
}

// ============================================================================
// Test 1: Proposal accepted - both sides hold a zeroed trustline
// ============================================================================

#[tokio::test]
async fn test_proposal_accepted() {
    let ledger = Arc::new(MemoryLedger::new());
    let alice = start_node("alice", ProposalPolicy::Manual, &ledger).await;
    let bob = start_node("bob", ProposalPolicy::AcceptAll, &ledger).await;

    connect(&alice, "alice", &bob, "bob").await;

    let a = alice.handle().snapshot().await.unwrap();
    let b = bob.handle().snapshot().await.unwrap();
    assert_eq!(a.indexed, vec!["bob".to_string()]);
    assert_eq!(b.indexed, vec!["alice".to_string()]);
    assert!(a.consistent && b.consistent);

    alice.shutdown().await;
    bob.shutdown().await;
}

// ============================================================================
// Test 2: Manual decision - the operator resolves a queued proposal
// ============================================================================

#[tokio::test]
async fn test_manual_accept() {
    let ledger = Arc::new(MemoryLedger::new());
    let alice = start_node("alice", ProposalPolicy::Manual, &ledger).await;
    let mut bob = start_node("bob", ProposalPolicy::Manual, &ledger).await;
    let mut proposals = bob.take_proposals().unwrap();
    assert!(bob.take_proposals().is_none());

    alice.handle().propose("bob", bob.local_addr()).await.unwrap();

    let notice = timeout(Duration::from_millis(PROPAGATION_TIMEOUT_MS), proposals.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notice.peer_id, "alice");

    // Still pending on the proposer's side.
    let err = alice.handle().pay("bob", 10).await.unwrap_err();
    assert_eq!(err, HostError::PendingConnection("bob".to_string()));

    assert_eq!(bob.handle().accept().await.unwrap(), "alice");
    assert!(wait_trustline(&alice.handle(), "bob", Some((0, 0))).await);

    alice.shutdown().await;
    bob.shutdown().await;
}

// ============================================================================
// Test 3: Rejection - the proposer's connection is removed on both sides
// ============================================================================

#[tokio::test]
async fn test_proposal_rejected() {
    let ledger = Arc::new(MemoryLedger::new());
    let alice = start_node("alice", ProposalPolicy::Manual, &ledger).await;
    let mut bob = start_node("bob", ProposalPolicy::Manual, &ledger).await;
    let mut proposals = bob.take_proposals().unwrap();

    alice.handle().propose("bob", bob.local_addr()).await.unwrap();
    timeout(Duration::from_millis(PROPAGATION_TIMEOUT_MS), proposals.recv())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(bob.handle().reject().await.unwrap(), "alice");

    assert!(wait_connections(&alice.handle(), 0).await);
    assert!(wait_connections(&bob.handle(), 0).await);

    let a = alice.handle().snapshot().await.unwrap();
    assert!(a.indexed.is_empty());
    assert!(a.consistent);
    assert_eq!(
        alice.handle().pay("bob", 1).await.unwrap_err(),
        HostError::UnknownPeer("bob".to_string())
    );

    alice.shutdown().await;
    bob.shutdown().await;
}

// ============================================================================
// Test 4: Payments - balances mirror on both nodes
// ============================================================================

#[tokio::test]
async fn test_payments_mirror() {
    let ledger = Arc::new(MemoryLedger::new());
    let alice = start_node("alice", ProposalPolicy::Manual, &ledger).await;
    let bob = start_node("bob", ProposalPolicy::AcceptAll, &ledger).await;
    connect(&alice, "alice", &bob, "bob").await;

    alice.handle().pay("bob", 30).await.unwrap();
    assert!(wait_trustline(&bob.handle(), "alice", Some((30, -30))).await);
    assert_eq!(trustline(&alice.handle(), "bob").await, Some((-30, 30)));

    bob.handle().pay("alice", 50).await.unwrap();
    assert!(wait_trustline(&alice.handle(), "bob", Some((20, -20))).await);
    assert_eq!(trustline(&bob.handle(), "alice").await, Some((-20, 20)));

    // Bob owes alice 20 and settles it on the ledger.
    bob.handle().settle("alice", 20).await.unwrap();
    assert!(wait_trustline(&alice.handle(), "bob", Some((0, 0))).await);
    assert_eq!(ledger.balance_of("bob").await, Some(480));
    assert_eq!(ledger.balance_of("alice").await, Some(520));

    alice.shutdown().await;
    bob.shutdown().await;
}

// ============================================================================
// Test 5: Splitting - an over-limit payment settles through the ledger
// ============================================================================

#[tokio::test]
async fn test_split_payment() {
    let ledger = Arc::new(MemoryLedger::new());
    let alice = start_node("alice", ProposalPolicy::Manual, &ledger).await;
    let bob = start_node("bob", ProposalPolicy::AcceptAll, &ledger).await;
    connect(&alice, "alice", &bob, "bob").await;

    alice.handle().pay("bob", 80).await.unwrap();
    assert!(wait_trustline(&bob.handle(), "alice", Some((80, -80))).await);

    let steps = alice.handle().pay("bob", 30).await.unwrap();
    assert_eq!(steps.len(), 3);

    assert!(wait_trustline(&bob.handle(), "alice", Some((10, -10))).await);
    let a = alice.handle().snapshot().await.unwrap();
    assert_eq!(a.trustline("bob"), Some((-10, 10)));
    assert_eq!(a.ledger_balance, 400);
    assert_eq!(ledger.balance_of("alice").await, Some(400));
    assert_eq!(ledger.balance_of("bob").await, Some(600));

    alice.shutdown().await;
    bob.shutdown().await;
}

// ============================================================================
// Test 6: Malformed input - only the offending connection is dropped
// ============================================================================

#[tokio::test]
async fn test_malformed_input() {
    let ledger = Arc::new(MemoryLedger::new());
    let alice = start_node("alice", ProposalPolicy::Manual, &ledger).await;
    let bob = start_node("bob", ProposalPolicy::AcceptAll, &ledger).await;
    connect(&alice, "alice", &bob, "bob").await;
    alice.handle().pay("bob", 25).await.unwrap();
    assert!(wait_trustline(&bob.handle(), "alice", Some((25, -25))).await);

    let mut raw = TcpStream::connect(bob.local_addr()).await.unwrap();
    assert!(wait_connections(&bob.handle(), 2).await);

    raw.write_all(b"{\"HostID\":\"mallory\",\"Type\":\"Pay\"}").await.unwrap();

    // Bob closes the offending socket: the read ends instead of hanging.
    let mut buf = Vec::new();
    let read = timeout(Duration::from_millis(PROPAGATION_TIMEOUT_MS), raw.read_to_end(&mut buf)).await;
    assert!(read.is_ok(), "connection was not closed");
    assert!(buf.is_empty());

    assert!(wait_connections(&bob.handle(), 1).await);
    let b = bob.handle().snapshot().await.unwrap();
    assert_eq!(b.trustline("alice"), Some((25, -25)));
    assert!(b.consistent);

    // The surviving trustline keeps working.
    alice.handle().pay("bob", 5).await.unwrap();
    assert!(wait_trustline(&bob.handle(), "alice", Some((30, -30))).await);

    alice.shutdown().await;
    bob.shutdown().await;
}

// ============================================================================
// Test 7: Disconnect - a stopped node is unregistered by its peers
// ============================================================================

#[tokio::test]
async fn test_disconnect_unregisters() {
    let ledger = Arc::new(MemoryLedger::new());
    let alice = start_node("alice", ProposalPolicy::Manual, &ledger).await;
    let bob = start_node("bob", ProposalPolicy::AcceptAll, &ledger).await;
    let carol = start_node("carol", ProposalPolicy::AcceptAll, &ledger).await;
    connect(&alice, "alice", &bob, "bob").await;
    connect(&alice, "alice", &carol, "carol").await;

    bob.shutdown().await;

    assert!(wait_trustline(&alice.handle(), "bob", None).await);
    let a = alice.handle().snapshot().await.unwrap();
    assert_eq!(a.indexed, vec!["carol".to_string()]);
    assert!(a.consistent);

    alice.shutdown().await;
    carol.shutdown().await;
}

// ============================================================================
// Test 8: Dial failures and duplicate proposals
// ============================================================================

#[tokio::test]
async fn test_duplicate_proposal_refused() {
    let ledger = Arc::new(MemoryLedger::new());
    let alice = start_node("alice", ProposalPolicy::Manual, &ledger).await;
    let bob = start_node("bob", ProposalPolicy::AcceptAll, &ledger).await;
    connect(&alice, "alice", &bob, "bob").await;

    let err = alice.handle().propose("bob", bob.local_addr()).await.unwrap_err();
    assert_eq!(err, HostError::AlreadyConnected("bob".to_string()));

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn test_dial_failure_releases_peer() {
    let ledger = Arc::new(MemoryLedger::new());
    let alice = start_node("alice", ProposalPolicy::Manual, &ledger).await;

    let closed: SocketAddr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let err = alice.handle().propose("bob", closed).await.unwrap_err();
    assert!(matches!(err, HostError::ConnectFailed { ref peer_id, .. } if peer_id == "bob"));

    // The reservation was released: bob can be proposed to once it is up.
    let bob = start_node("bob", ProposalPolicy::AcceptAll, &ledger).await;
    connect(&alice, "alice", &bob, "bob").await;

    // The address published to the ledger is enough to find a peer.
    let users = ledger.list_users().await.unwrap();
    assert_eq!(users["bob"].peering_info.socket_addr(), Some(bob.local_addr()));

    alice.shutdown().await;
    bob.shutdown().await;
}
