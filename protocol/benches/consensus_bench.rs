// Consensus benchmarks for huron.
//
// Covers event signing and verification, event insertion, and full
// consensus (rounds, fame, ordering, blocks) over a pre-built DAG.

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

use huron_protocol::crypto::Keypair;
use huron_protocol::hashgraph::{Event, Hashgraph, HashgraphConfig, InmemStore};
use huron_protocol::peers::{Peer, PeerSet};

/// A valid DAG for `n` validators: every validator creates `per_node`
/// events, each syncing with the next validator in the ring.
fn build_dag(n: u8, per_node: usize) -> (PeerSet, Vec<Event>) {
    let keys: Vec<Keypair> = (1..=n).map(|i| Keypair::from_seed(&[i; 32])).collect();
    let peers = PeerSet::new(
        keys.iter()
            .enumerate()
            .map(|(i, k)| Peer::new(k.public_key(), format!("n{i}"), format!("n{i}")))
            .collect(),
    );

    let mut heads: Vec<Option<Event>> = vec![None; keys.len()];
    let mut events = Vec::with_capacity(keys.len() * per_node);
    for step in 0..keys.len() * per_node {
        let i = step % keys.len();
        let other = if step < keys.len() {
            None
        } else {
            heads[(i + 1) % keys.len()].as_ref().map(Event::hash)
        };
        let self_parent = heads[i].as_ref();
        let mut event = Event::new(
            vec![vec![step as u8; 16]],
            vec![],
            self_parent.map(Event::hash),
            other,
            keys[i].public_key(),
            self_parent.map_or(0, |e| e.index() + 1),
        );
        event.sign(&keys[i]);
        heads[i] = Some(event.clone());
        events.push(event);
    }
    (peers, events)
}

fn fresh(peers: &PeerSet) -> Hashgraph {
    Hashgraph::new(Arc::new(InmemStore::new()), peers.clone(), HashgraphConfig::default())
        .expect("hashgraph")
}

fn bench_event_signing(c: &mut Criterion) {
    let kp = Keypair::from_seed(&[7; 32]);
    let mut event = Event::new(vec![vec![0u8; 64]], vec![], None, None, kp.public_key(), 0);

    c.bench_function("event/sign", |b| b.iter(|| event.sign(&kp)));
    event.sign(&kp);
    c.bench_function("event/verify", |b| b.iter(|| event.verify()));
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("hashgraph/insert");
    for n in [4u8, 7, 10] {
        let (peers, events) = build_dag(n, 20);
        group.throughput(Throughput::Elements(events.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &events, |b, events| {
            b.iter_batched(
                || (fresh(&peers), events.clone()),
                |(mut hg, events)| {
                    for event in events {
                        hg.insert_event(event).expect("insert");
                    }
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_consensus(c: &mut Criterion) {
    let mut group = c.benchmark_group("hashgraph/consensus");
    group.sample_size(20);
    for n in [4u8, 7, 10] {
        let (peers, events) = build_dag(n, 30);
        group.throughput(Throughput::Elements(events.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &events, |b, events| {
            b.iter_batched(
                || {
                    let mut hg = fresh(&peers);
                    for event in events.clone() {
                        hg.insert_event(event).expect("insert");
                    }
                    hg
                },
                |mut hg| {
                    let mut blocks = 0;
                    loop {
                        hg.run_consensus().expect("consensus");
                        let Some(block) = hg.create_next_block().expect("block") else {
                            break;
                        };
                        hg.apply_commit(block, [0u8; 32], vec![]).expect("commit");
                        blocks += 1;
                    }
                    blocks
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_event_signing, bench_insert, bench_consensus);
criterion_main!(benches);
