//! Multi-node runs over the in-memory network.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use huron_protocol::config::{NodeConfig, FRAME_DEPTH};
use huron_protocol::crypto::Keypair;
use huron_protocol::hashgraph::InmemStore;
use huron_protocol::net::InmemNetwork;
use huron_protocol::node::{Node, NodeHandle, NodeResult, NodeState, Validator};
use huron_protocol::peers::PeerSet;
use huron_protocol::proxy::{DummyState, InmemProxy};

struct Running {
    handle: NodeHandle,
    task: JoinHandle<NodeResult<()>>,
    state: Arc<DummyState>,
    submit: mpsc::Sender<Vec<u8>>,
}

fn validator(i: u8) -> Validator {
    Validator::new(Keypair::from_seed(&[i + 1; 32]), format!("node{i}"))
}

fn addr(i: u8) -> String {
    format!("node{i}")
}

fn genesis(n: u8) -> PeerSet {
    PeerSet::new((0..n).map(|i| validator(i).as_peer(addr(i))).collect())
}

fn start(net: &Arc<InmemNetwork>, i: u8, peers: &PeerSet, genesis: &PeerSet, config: &NodeConfig) -> Running {
    let state = Arc::new(DummyState::new());
    let proxy = InmemProxy::new(Arc::clone(&state));
    let submit = proxy.submitter();
    let node = Node::new(
        config.clone(),
        validator(i),
        peers,
        genesis.clone(),
        Arc::new(InmemStore::new()),
        Arc::new(net.transport(addr(i), config.tcp_timeout, config.join_timeout)),
        Arc::new(proxy),
    )
    .unwrap();
    let (handle, task) = node.spawn();
    Running {
        handle,
        task,
        state,
        submit,
    }
}

async fn wait_until(what: &str, timeout: Duration, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        sleep(Duration::from_millis(20)).await;
    }
}

async fn stop(nodes: Vec<Running>) {
    for node in &nodes {
        node.handle.shutdown();
    }
    for node in nodes {
        node.task.await.unwrap().unwrap();
    }
}

/// Every node has committed block `index`, and they all agree on it.
fn assert_same_block(nodes: &[Running], index: u64) {
    let reference = nodes[0].handle.block(index).unwrap().unwrap();
    for node in &nodes[1..] {
        assert_eq!(node.handle.block(index).unwrap().unwrap(), reference);
    }
}

fn last_block(node: &Running) -> Option<u64> {
    node.handle.stats().last_block_index
}

// -- 1. Steady state --------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn four_nodes_commit_the_same_blocks() {
    let net = InmemNetwork::new();
    let config = NodeConfig::test_config();
    let peers = genesis(4);
    let nodes: Vec<Running> = (0..4).map(|i| start(&net, i, &peers, &peers, &config)).collect();

    for round in 0..5u8 {
        for (i, node) in nodes.iter().enumerate() {
            node.submit.send(vec![round, i as u8]).await.unwrap();
        }
        sleep(Duration::from_millis(20)).await;
    }

    wait_until("all transactions committed", Duration::from_secs(30), || {
        nodes
            .iter()
            .all(|n| n.handle.stats().consensus_transactions >= 20)
    })
    .await;

    let common = nodes.iter().filter_map(last_block).min().unwrap();
    for index in 0..=common {
        assert_same_block(&nodes, index);
    }
    let committed = nodes[0].state.committed_transactions();
    for node in &nodes[1..] {
        let theirs = node.state.committed_transactions();
        let n = committed.len().min(theirs.len());
        assert_eq!(committed[..n], theirs[..n]);
    }
    for node in &nodes {
        assert_eq!(node.handle.state(), NodeState::Babbling);
        assert_eq!(node.handle.peers().len(), 4);
    }
    stop(nodes).await;
}

// -- 2. Dynamic membership --------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_fifth_node_joins_and_keeps_up() {
    let net = InmemNetwork::new();
    let config = NodeConfig::test_config();
    let peers = genesis(4);
    let mut nodes: Vec<Running> = (0..4).map(|i| start(&net, i, &peers, &peers, &config)).collect();

    nodes[0].submit.send(b"before".to_vec()).await.unwrap();
    wait_until("first block", Duration::from_secs(30), || {
        nodes.iter().all(|n| last_block(n).is_some())
    })
    .await;

    let joiner = start(&net, 4, &peers, &peers, &config);
    assert_eq!(joiner.handle.state(), NodeState::Joining);
    nodes.push(joiner);

    wait_until("peer set of five everywhere", Duration::from_secs(60), || {
        nodes.iter().all(|n| n.handle.peers().len() == 5)
    })
    .await;
    wait_until("joiner babbling", Duration::from_secs(30), || {
        nodes[4].handle.state() == NodeState::Babbling
    })
    .await;

    nodes[4].submit.send(b"from the newcomer".to_vec()).await.unwrap();
    wait_until("newcomer's transaction committed", Duration::from_secs(60), || {
        nodes.iter().all(|n| {
            n.state
                .committed_transactions()
                .contains(&b"from the newcomer".to_vec())
        })
    })
    .await;

    let common = nodes.iter().filter_map(last_block).min().unwrap();
    assert_same_block(&nodes, common);
    assert_eq!(nodes[4].handle.genesis_peers().len(), 4);
    stop(nodes).await;
}

// -- 3. Catching up ---------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn late_node_fast_forwards_to_the_same_state() {
    let net = InmemNetwork::new();
    let config = NodeConfig {
        enable_fast_sync: true,
        sync_limit: 50,
        ..NodeConfig::test_config()
    };
    let peers = genesis(4);
    let mut nodes: Vec<Running> = (0..3).map(|i| start(&net, i, &peers, &peers, &config)).collect();

    for i in 0..30u8 {
        nodes[(i % 3) as usize].submit.send(vec![i]).await.unwrap();
        sleep(Duration::from_millis(10)).await;
    }
    wait_until("history to build up", Duration::from_secs(60), || {
        nodes.iter().all(|n| {
            let stats = n.handle.stats();
            stats.consensus_transactions >= 30
                && stats.consensus_events > 4 * config.sync_limit as u64
                && stats.last_consensus_round.is_some_and(|r| r > 2 * FRAME_DEPTH)
        })
    })
    .await;
    let behind = last_block(&nodes[0]).unwrap();

    nodes.push(start(&net, 3, &peers, &peers, &config));
    wait_until("late node past the history", Duration::from_secs(60), || {
        last_block(&nodes[3]).is_some_and(|i| i > behind)
    })
    .await;

    for i in 0..5u8 {
        nodes[0].submit.send(vec![100 + i]).await.unwrap();
    }
    let target = last_block(&nodes[3]).unwrap() + 3;
    wait_until("everyone past the target", Duration::from_secs(60), || {
        nodes.iter().all(|n| last_block(n).is_some_and(|i| i >= target))
    })
    .await;

    // The late node never saw the early blocks, and holds an unbroken run
    // from the block it fast-forwarded to.
    let first = (0..=target)
        .find(|i| nodes[3].handle.block(*i).unwrap().is_some())
        .unwrap();
    assert!(first > 0);
    for index in first..=target {
        let late = nodes[3]
            .handle
            .block(index)
            .unwrap()
            .unwrap_or_else(|| panic!("late node is missing block {index}"));
        let reference = nodes[0].handle.block(index).unwrap().unwrap();
        assert_eq!(late, reference, "block {index} differs");
    }
    stop(nodes).await;
}
