//! Consensus properties over a simulated network.
//!
//! Each simulated node owns a hashgraph and a dummy application. Nodes
//! "gossip" by pulling the events they lack straight from another node's
//! hashgraph, the way a sync RPC would, so runs are fast and deterministic
//! in structure.

use std::collections::BTreeMap;
use std::sync::Arc;

use huron_protocol::crypto::Keypair;
use huron_protocol::hashgraph::{
    Block, Event, EventHash, Hashgraph, HashgraphConfig, InmemStore, InternalTransaction,
    TransactionType, Trilean,
};
use huron_protocol::peers::{Peer, PeerId, PeerSet};
use huron_protocol::proxy::{DummyState, ProxyHandler};

// ---------------------------------------------------------------------------
// Simulation harness
// ---------------------------------------------------------------------------

struct SimNode {
    keypair: Keypair,
    hashgraph: Hashgraph,
    app: DummyState,
    blocks: Vec<Block>,
}

struct Sim {
    nodes: Vec<SimNode>,
    genesis: PeerSet,
}

fn keypair(i: u8) -> Keypair {
    Keypair::from_seed(&[i; 32])
}

fn id_of(kp: &Keypair) -> PeerId {
    huron_protocol::peers::peer_id(&kp.public_key())
}

impl Sim {
    fn new(n: u8) -> Self {
        let keys: Vec<Keypair> = (1..=n).map(keypair).collect();
        let genesis = PeerSet::new(
            keys.iter()
                .enumerate()
                .map(|(i, k)| Peer::new(k.public_key(), format!("10.0.0.{i}:1337"), format!("n{i}")))
                .collect(),
        );
        let nodes = keys
            .into_iter()
            .map(|keypair| SimNode {
                keypair,
                hashgraph: Hashgraph::new(
                    Arc::new(InmemStore::new()),
                    genesis.clone(),
                    HashgraphConfig::default(),
                )
                .unwrap(),
                app: DummyState::new(),
                blocks: Vec::new(),
            })
            .collect();
        Sim { nodes, genesis }
    }

    /// Node `i` creates and inserts its next event.
    fn create(
        &mut self,
        i: usize,
        other: Option<EventHash>,
        txs: Vec<Vec<u8>>,
        itxs: Vec<InternalTransaction>,
    ) -> EventHash {
        let node = &mut self.nodes[i];
        let creator = id_of(&node.keypair);
        let last = node.hashgraph.last_event_from(creator).unwrap();
        let mut event = Event::new(
            txs,
            itxs,
            last.map(|(h, _)| h),
            other,
            node.keypair.public_key(),
            last.map_or(0, |(_, idx)| idx + 1),
        );
        event.sign(&node.keypair);
        node.hashgraph.insert_event(event).unwrap()
    }

    fn first_events(&mut self) -> Vec<EventHash> {
        (0..self.nodes.len())
            .map(|i| self.create(i, None, vec![], vec![]))
            .collect()
    }

    /// `to` pulls what it lacks from `from`, records the sync in a new
    /// event, then runs consensus and commits.
    fn pull(&mut self, to: usize, from: usize, txs: Vec<Vec<u8>>) {
        let known = self.nodes[to].hashgraph.known_events().unwrap();
        let (events, _) = self.nodes[from].hashgraph.events_diff(&known, 10_000).unwrap();
        let mut head = None;
        for event in events {
            head = Some(self.nodes[to].hashgraph.insert_event(event).unwrap());
        }
        if head.is_some() || !txs.is_empty() {
            let other = head.or_else(|| {
                let from_id = id_of(&self.nodes[from].keypair);
                self.nodes[to]
                    .hashgraph
                    .last_event_from(from_id)
                    .unwrap()
                    .map(|(h, _)| h)
            });
            self.create(to, other, txs, vec![]);
        }
        self.commit(to);
    }

    fn commit(&mut self, i: usize) {
        let node = &mut self.nodes[i];
        loop {
            node.hashgraph.run_consensus().unwrap();
            let Some(block) = node.hashgraph.create_next_block().unwrap() else {
                break;
            };
            let response = node.app.commit_handler(&block).unwrap();
            let block = node
                .hashgraph
                .apply_commit(
                    block,
                    response.state_hash,
                    response.internal_transaction_receipts,
                )
                .unwrap();
            node.blocks.push(block);
        }
    }

    /// Ring gossip: every node pulls from its right neighbour, `rounds`
    /// times over.
    fn gossip(&mut self, rounds: usize) {
        let n = self.nodes.len();
        for _ in 0..rounds {
            for to in 0..n {
                self.pull(to, (to + 1) % n, vec![]);
            }
        }
    }

    fn all_events(&self, i: usize) -> Vec<Event> {
        self.nodes[i]
            .hashgraph
            .store()
            .topological_events(0, usize::MAX)
            .unwrap()
    }
}

fn assert_prefix_agreement(sim: &Sim) {
    for a in &sim.nodes {
        for b in &sim.nodes {
            let common = a.blocks.len().min(b.blocks.len());
            assert_eq!(a.blocks[..common], b.blocks[..common]);
        }
    }
}

// ---------------------------------------------------------------------------
// 1. The four-peer scenario
// ---------------------------------------------------------------------------

#[test]
fn four_first_events_form_block_zero() {
    let mut sim = Sim::new(4);
    let firsts = sim.first_events();
    sim.gossip(30);

    let block = sim.nodes[0].blocks.first().expect("no block produced");
    assert_eq!(block.index, 0);
    assert!(block.transactions.is_empty());

    let frame = sim.nodes[0]
        .hashgraph
        .get_frame(block.round_received)
        .unwrap();
    assert_eq!(frame.hash().unwrap(), block.frame_hash);
    let in_frame: Vec<EventHash> = frame.events.iter().map(|fe| fe.event.hash()).collect();
    for h in &firsts {
        assert!(in_frame.contains(h), "first event missing from frame of block 0");
    }
    assert_eq!(block.peers_hash, sim.genesis.hash());
}

// ---------------------------------------------------------------------------
// 2. Agreement and determinism
// ---------------------------------------------------------------------------

#[test]
fn nodes_agree_on_blocks_and_state() {
    let mut sim = Sim::new(4);
    sim.first_events();
    for step in 0..40u8 {
        let to = (step % 4) as usize;
        sim.pull(to, (to + 1) % 4, vec![vec![step]]);
    }
    sim.gossip(20);

    for node in &sim.nodes {
        assert!(node.blocks.len() >= 2, "too few blocks");
    }
    assert_prefix_agreement(&sim);

    let committed: usize = sim.nodes[0].blocks.iter().map(|b| b.transactions.len()).sum();
    assert!(committed > 0);
    let shortest = sim.nodes.iter().map(|n| n.blocks.len()).min().unwrap();
    let reference = sim.nodes[0].blocks[shortest - 1].state_hash;
    for node in &sim.nodes {
        assert_eq!(node.blocks[shortest - 1].state_hash, reference);
    }
}

#[test]
fn replaying_the_same_events_gives_identical_blocks() {
    let mut sim = Sim::new(4);
    sim.first_events();
    for step in 0..24u8 {
        let to = (step % 4) as usize;
        sim.pull(to, (to + 1) % 4, vec![vec![step, step]]);
    }
    sim.gossip(15);

    let events = sim.all_events(0);
    let mut replay = Hashgraph::new(
        Arc::new(InmemStore::new()),
        sim.genesis.clone(),
        HashgraphConfig::default(),
    )
    .unwrap();
    assert_eq!(replay.bootstrap(events.clone()).unwrap(), events.len());

    let app = DummyState::new();
    let mut blocks = Vec::new();
    loop {
        replay.run_consensus().unwrap();
        let Some(block) = replay.create_next_block().unwrap() else {
            break;
        };
        let response = app.commit_handler(&block).unwrap();
        blocks.push(
            replay
                .apply_commit(block, response.state_hash, response.internal_transaction_receipts)
                .unwrap(),
        );
    }
    assert_eq!(blocks, sim.nodes[0].blocks);
}

#[test]
fn node_reset_from_a_frame_builds_the_same_blocks() {
    let mut sim = Sim::new(4);
    sim.first_events();
    for step in 0..40u8 {
        let to = (step % 4) as usize;
        sim.pull(to, (to + 1) % 4, vec![vec![step, 7]]);
    }
    sim.gossip(30);

    let reference = &sim.nodes[0];
    assert!(reference.blocks.len() >= 6, "too few blocks");
    let anchor = reference.blocks.len() / 2;
    let block = reference.blocks[anchor].clone();
    let frame = reference.hashgraph.get_frame(block.round_received).unwrap();
    let peer_sets: Vec<PeerSet> = reference.hashgraph.peer_sets().values().cloned().collect();
    let snapshot = reference.app.snapshot_handler(block.index).unwrap();

    let mut observer = Hashgraph::new(
        Arc::new(InmemStore::new()),
        sim.genesis.clone(),
        HashgraphConfig::default(),
    )
    .unwrap();
    observer.reset(block.clone(), frame, peer_sets).unwrap();
    let app = DummyState::new();
    app.restore_handler(&snapshot).unwrap();
    assert_eq!(observer.last_block_index(), Some(block.index));

    let known = observer.known_events().unwrap();
    let (events, _) = reference.hashgraph.events_diff(&known, 100_000).unwrap();
    assert!(!events.is_empty());
    for event in events {
        observer.insert_event(event).unwrap();
    }

    let mut blocks = Vec::new();
    loop {
        observer.run_consensus().unwrap();
        let Some(next) = observer.create_next_block().unwrap() else {
            break;
        };
        let response = app.commit_handler(&next).unwrap();
        blocks.push(
            observer
                .apply_commit(next, response.state_hash, response.internal_transaction_receipts)
                .unwrap(),
        );
    }
    assert!(!blocks.is_empty());
    assert_eq!(blocks[..], reference.blocks[anchor + 1..]);
}

// ---------------------------------------------------------------------------
// 3. Structural invariants
// ---------------------------------------------------------------------------

#[test]
fn rounds_never_decrease_along_parents() {
    let mut sim = Sim::new(4);
    sim.first_events();
    sim.gossip(20);

    let hg = &sim.nodes[0].hashgraph;
    for event in sim.all_events(0) {
        let hash = event.hash();
        let Some(round) = hg.round(&hash).unwrap() else {
            continue;
        };
        for parent in [event.self_parent(), event.other_parent()].into_iter().flatten() {
            let parent_round = hg.round(&parent).unwrap().unwrap();
            assert!(round >= parent_round);
        }
    }
}

#[test]
fn self_parent_chains_are_strictly_sequential() {
    let mut sim = Sim::new(4);
    sim.first_events();
    sim.gossip(10);

    let store = sim.nodes[0].hashgraph.store();
    for (creator, last) in store.known_events().unwrap() {
        let mut previous: Option<EventHash> = None;
        for index in 0..=last {
            let hash = store.participant_event(creator, index).unwrap().unwrap();
            let event = store.get_event(&hash).unwrap().unwrap();
            assert_eq!(event.index(), index);
            assert_eq!(event.self_parent(), previous);
            previous = Some(hash);
        }
    }
}

#[test]
fn block_indices_are_contiguous() {
    let mut sim = Sim::new(4);
    sim.first_events();
    sim.gossip(30);

    for node in &sim.nodes {
        for (expected, block) in node.blocks.iter().enumerate() {
            assert_eq!(block.index, expected as u64);
        }
        let stored = node.hashgraph.store().last_block_index().unwrap();
        assert_eq!(stored, node.blocks.last().map(|b| b.index));
    }
}

#[test]
fn decisions_are_final() {
    let mut sim = Sim::new(4);
    sim.first_events();
    sim.gossip(20);

    let hg = &sim.nodes[0].hashgraph;
    let mut decided: BTreeMap<EventHash, (Option<u64>, Trilean)> = BTreeMap::new();
    for event in sim.all_events(0) {
        let hash = event.hash();
        let rr = hg.round_received(&hash).unwrap();
        let fame = hg.fame(&hash).unwrap();
        if rr.is_some() || fame != Trilean::Undefined {
            decided.insert(hash, (rr, fame));
        }
    }
    assert!(!decided.is_empty());

    sim.gossip(20);
    let hg = &sim.nodes[0].hashgraph;
    for (hash, (rr, fame)) in decided {
        if rr.is_some() {
            assert_eq!(hg.round_received(&hash).unwrap(), rr);
        }
        if fame != Trilean::Undefined {
            assert_eq!(hg.fame(&hash).unwrap(), fame);
        }
    }
}

// ---------------------------------------------------------------------------
// 4. Membership
// ---------------------------------------------------------------------------

#[test]
fn accepted_join_activates_at_the_anchor_round_everywhere() {
    let mut sim = Sim::new(4);
    sim.first_events();
    sim.gossip(3);

    let newcomer = keypair(42);
    let itx = InternalTransaction::signed(
        TransactionType::PeerAdd,
        Peer::new(newcomer.public_key(), "10.0.0.42:1337", "newcomer"),
        &newcomer,
    );
    let other = sim.nodes[0]
        .hashgraph
        .last_event_from(id_of(&sim.nodes[1].keypair))
        .unwrap()
        .map(|(h, _)| h);
    sim.create(0, other, vec![], vec![itx.clone()]);
    sim.gossip(30);

    let offset = HashgraphConfig::default().membership_anchor_offset;
    let mut expected = None;
    for node in &sim.nodes {
        let block = node
            .blocks
            .iter()
            .find(|b| b.internal_transactions.contains(&itx))
            .expect("join never reached consensus");
        assert!(block.internal_transaction_receipts.iter().all(|r| r.accepted));

        let sets = node.hashgraph.peer_sets();
        assert_eq!(sets.len(), 2);
        let (round, set) = sets.iter().next_back().unwrap();
        assert_eq!(*round, block.round_received + offset);
        assert!(set.contains(id_of(&newcomer)));
        assert_eq!(set.len(), 5);

        let this = (*round, set.hash(), block.index);
        match expected {
            None => expected = Some(this),
            Some(e) => assert_eq!(e, this),
        }
    }
    assert_prefix_agreement(&sim);
}
