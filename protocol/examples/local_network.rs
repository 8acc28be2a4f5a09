//! Four validators gossiping over the in-memory network.
//!
//! Each node runs the dummy application. Transactions are submitted to
//! random nodes and every node prints the blocks it commits.
//!
//! Run with:
//!   cargo run --example local_network

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing_subscriber::EnvFilter;

use huron_protocol::config::NodeConfig;
use huron_protocol::crypto::Keypair;
use huron_protocol::hashgraph::InmemStore;
use huron_protocol::net::InmemNetwork;
use huron_protocol::node::{Node, NodeHandle, Validator};
use huron_protocol::peers::PeerSet;
use huron_protocol::proxy::{DummyClient, DummyState, InmemProxy};

const NODES: usize = 4;
const TRANSACTIONS: usize = 40;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let net = InmemNetwork::new();
    let config = NodeConfig::test_config();
    let validators: Vec<Validator> = (0..NODES)
        .map(|i| Validator::new(Keypair::generate(), format!("node{i}")))
        .collect();
    let peers = PeerSet::new(
        validators
            .iter()
            .map(|v| v.as_peer(v.moniker()))
            .collect(),
    );

    let mut handles: Vec<NodeHandle> = Vec::new();
    let mut clients = Vec::new();
    let mut apps = Vec::new();
    for validator in validators {
        let addr = validator.moniker().to_string();
        let app = Arc::new(DummyState::new());
        let proxy = InmemProxy::new(Arc::clone(&app));
        clients.push(DummyClient::new(proxy.submitter()));
        apps.push(app);

        let node = Node::new(
            config.clone(),
            validator,
            &peers,
            peers.clone(),
            Arc::new(InmemStore::new()),
            Arc::new(net.transport(addr, config.tcp_timeout, config.join_timeout)),
            Arc::new(proxy),
        )
        .expect("node");
        let (handle, _task) = node.spawn();
        handles.push(handle);
    }

    println!("submitting {TRANSACTIONS} transactions to {NODES} nodes");
    for i in 0..TRANSACTIONS {
        let target = rand::thread_rng().gen_range(0..NODES);
        clients[target]
            .submit_tx(format!("tx-{i:03}"))
            .await
            .expect("submit");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    while handles
        .iter()
        .any(|h| h.stats().consensus_transactions < TRANSACTIONS as u64)
    {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    for (handle, app) in handles.iter().zip(&apps) {
        let stats = handle.stats();
        println!(
            "{:>6}: {} blocks, {} events in consensus, state {}",
            stats.moniker,
            stats.last_block_index.map_or(0, |i| i + 1),
            stats.consensus_events,
            &hex::encode(app.state_hash())[..16],
        );
    }
    for handle in &handles {
        handle.shutdown();
    }
}
