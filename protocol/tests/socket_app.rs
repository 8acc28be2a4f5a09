//! A node driving an application that lives behind the socket proxy.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::{sleep, Instant};

use huron_protocol::config::NodeConfig;
use huron_protocol::crypto::Keypair;
use huron_protocol::hashgraph::InmemStore;
use huron_protocol::net::InmemNetwork;
use huron_protocol::node::{Node, Validator};
use huron_protocol::peers::PeerSet;
use huron_protocol::proxy::{DummyState, SocketAppProxy, SocketNodeProxy};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lone_node_commits_to_a_socket_application() {
    let config = NodeConfig::test_config();
    let timeout = Duration::from_secs(2);

    let app_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let app_addr = app_listener.local_addr().unwrap().to_string();
    let proxy = SocketAppProxy::bind("127.0.0.1:0", app_addr, timeout)
        .await
        .unwrap();
    let state = Arc::new(DummyState::new());
    let app = SocketNodeProxy::serve(app_listener, proxy.local_addr(), Arc::clone(&state), timeout)
        .unwrap();

    let net = InmemNetwork::new();
    let validator = Validator::new(Keypair::from_seed(&[4; 32]), "solo");
    let peers = PeerSet::new(vec![validator.as_peer("solo")]);
    let node = Node::new(
        config.clone(),
        validator,
        &peers,
        peers.clone(),
        Arc::new(InmemStore::new()),
        Arc::new(net.transport("solo", config.tcp_timeout, config.join_timeout)),
        Arc::new(proxy),
    )
    .unwrap();
    let (handle, task) = node.spawn();

    app.submit_tx("over the wire").await.unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    while handle.stats().consensus_transactions == 0 {
        assert!(Instant::now() < deadline, "transaction never committed");
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(state.committed_transactions(), vec![b"over the wire".to_vec()]);

    let index = handle.stats().last_block_index.unwrap();
    let block = handle.block(index).unwrap().unwrap();
    assert_eq!(block.state_hash, state.state_hash());

    handle.shutdown();
    task.await.unwrap().unwrap();
}
