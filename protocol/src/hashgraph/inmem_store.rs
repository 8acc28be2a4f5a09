//! In-memory [`Store`]. Unbounded: it keeps everything until the process
//! exits or the store is reset.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

use super::block::Block;
use super::event::{Event, EventHash, EventMeta};
use super::frame::{Frame, Root};
use super::round::RoundInfo;
use super::store::{Store, StoreResult};
use crate::peers::{PeerId, PeerSet};

#[derive(Default)]
struct Inner {
    events: HashMap<EventHash, Event>,
    metas: HashMap<EventHash, EventMeta>,
    participants: HashMap<PeerId, BTreeMap<u64, EventHash>>,
    topo: BTreeMap<u64, EventHash>,
    roots: HashMap<EventHash, Root>,
    rounds: BTreeMap<u64, RoundInfo>,
    blocks: BTreeMap<u64, Block>,
    frames: BTreeMap<u64, Frame>,
    peer_sets: BTreeMap<u64, PeerSet>,
}

#[derive(Default)]
pub struct InmemStore {
    inner: RwLock<Inner>,
}

impl InmemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for InmemStore {
    fn cache_size(&self) -> usize {
        0
    }

    fn get_event(&self, hash: &EventHash) -> StoreResult<Option<Event>> {
        Ok(self.inner.read().events.get(hash).cloned())
    }

    fn get_meta(&self, hash: &EventHash) -> StoreResult<Option<EventMeta>> {
        Ok(self.inner.read().metas.get(hash).cloned())
    }

    fn put_event(&self, event: &Event, meta: &EventMeta) -> StoreResult<()> {
        let hash = event.hash();
        let mut inner = self.inner.write();
        inner.events.insert(hash, event.clone());
        inner.metas.insert(hash, meta.clone());
        inner.topo.insert(meta.topological_index, hash);
        inner
            .participants
            .entry(meta.creator_id)
            .or_default()
            .insert(meta.index, hash);
        Ok(())
    }

    fn put_meta(&self, hash: &EventHash, meta: &EventMeta) -> StoreResult<()> {
        self.inner.write().metas.insert(*hash, meta.clone());
        Ok(())
    }

    fn participant_event(&self, creator: PeerId, index: u64) -> StoreResult<Option<EventHash>> {
        Ok(self
            .inner
            .read()
            .participants
            .get(&creator)
            .and_then(|chain| chain.get(&index).copied()))
    }

    fn last_event_from(&self, creator: PeerId) -> StoreResult<Option<(EventHash, u64)>> {
        Ok(self
            .inner
            .read()
            .participants
            .get(&creator)
            .and_then(|chain| chain.iter().next_back().map(|(i, h)| (*h, *i))))
    }

    fn known_events(&self) -> StoreResult<BTreeMap<PeerId, u64>> {
        Ok(self
            .inner
            .read()
            .participants
            .iter()
            .filter_map(|(p, chain)| chain.keys().next_back().map(|i| (*p, *i)))
            .collect())
    }

    fn topological_events(&self, from: u64, limit: usize) -> StoreResult<Vec<Event>> {
        let inner = self.inner.read();
        Ok(inner
            .topo
            .range(from..)
            .take(limit)
            .filter_map(|(_, h)| inner.events.get(h).cloned())
            .collect())
    }

    fn event_count(&self) -> StoreResult<u64> {
        Ok(self.inner.read().topo.len() as u64)
    }

    fn put_root(&self, root: &Root) -> StoreResult<()> {
        let mut inner = self.inner.write();
        inner.roots.insert(root.hash, root.clone());
        inner
            .participants
            .entry(root.creator_id)
            .or_default()
            .insert(root.index, root.hash);
        Ok(())
    }

    fn get_root(&self, hash: &EventHash) -> StoreResult<Option<Root>> {
        Ok(self.inner.read().roots.get(hash).cloned())
    }

    fn get_round(&self, round: u64) -> StoreResult<Option<RoundInfo>> {
        Ok(self.inner.read().rounds.get(&round).cloned())
    }

    fn put_round(&self, round: u64, info: &RoundInfo) -> StoreResult<()> {
        self.inner.write().rounds.insert(round, info.clone());
        Ok(())
    }

    fn delete_rounds_from(&self, round: u64) -> StoreResult<()> {
        self.inner.write().rounds.split_off(&round);
        Ok(())
    }

    fn last_round(&self) -> StoreResult<Option<u64>> {
        Ok(self.inner.read().rounds.keys().next_back().copied())
    }

    fn get_block(&self, index: u64) -> StoreResult<Option<Block>> {
        Ok(self.inner.read().blocks.get(&index).cloned())
    }

    fn put_block(&self, block: &Block) -> StoreResult<()> {
        self.inner.write().blocks.insert(block.index, block.clone());
        Ok(())
    }

    fn last_block_index(&self) -> StoreResult<Option<u64>> {
        Ok(self.inner.read().blocks.keys().next_back().copied())
    }

    fn get_frame(&self, round: u64) -> StoreResult<Option<Frame>> {
        Ok(self.inner.read().frames.get(&round).cloned())
    }

    fn put_frame(&self, frame: &Frame) -> StoreResult<()> {
        self.inner.write().frames.insert(frame.round, frame.clone());
        Ok(())
    }

    fn put_peer_set(&self, peer_set: &PeerSet) -> StoreResult<()> {
        self.inner
            .write()
            .peer_sets
            .insert(peer_set.round(), peer_set.clone());
        Ok(())
    }

    fn peer_sets(&self) -> StoreResult<BTreeMap<u64, PeerSet>> {
        Ok(self.inner.read().peer_sets.clone())
    }

    fn reset(&self) -> StoreResult<()> {
        *self.inner.write() = Inner::default();
        Ok(())
    }

    fn flush(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    fn event(kp: &Keypair, index: u64, self_parent: Option<EventHash>) -> (Event, EventMeta) {
        let mut e = Event::new(vec![], vec![], self_parent, None, kp.public_key(), index);
        e.sign(kp);
        let meta = EventMeta {
            creator_id: e.creator_id(),
            index,
            self_parent,
            topological_index: index,
            ..EventMeta::default()
        };
        (e, meta)
    }

    #[test]
    fn chain_and_topological_order() {
        let store = InmemStore::new();
        let kp = Keypair::from_seed(&[3u8; 32]);
        let (e0, m0) = event(&kp, 0, None);
        let (e1, m1) = event(&kp, 1, Some(e0.hash()));
        store.put_event(&e0, &m0).unwrap();
        store.put_event(&e1, &m1).unwrap();

        let creator = e0.creator_id();
        assert_eq!(store.last_event_from(creator).unwrap(), Some((e1.hash(), 1)));
        assert_eq!(store.participant_event(creator, 0).unwrap(), Some(e0.hash()));
        assert_eq!(store.known_events().unwrap()[&creator], 1);
        assert_eq!(store.topological_events(1, 10).unwrap(), vec![e1]);
        assert_eq!(store.event_count().unwrap(), 2);
    }

    #[test]
    fn roots_extend_chains_but_are_not_events() {
        let store = InmemStore::new();
        let root = Root {
            hash: EventHash([5u8; 32]),
            creator_id: 42,
            index: 9,
            round: 3,
            lamport: 20,
            last_ancestors: BTreeMap::from([(42, 9)]),
        };
        store.put_root(&root).unwrap();
        assert_eq!(store.last_event_from(42).unwrap(), Some((root.hash, 9)));
        assert!(store.get_event(&root.hash).unwrap().is_none());
        assert_eq!(store.get_root(&root.hash).unwrap(), Some(root));
    }

    #[test]
    fn delete_rounds_from_truncates() {
        let store = InmemStore::new();
        for r in 0..5 {
            store.put_round(r, &RoundInfo::default()).unwrap();
        }
        store.delete_rounds_from(3).unwrap();
        assert_eq!(store.last_round().unwrap(), Some(2));
        assert!(store.get_round(3).unwrap().is_none());
    }

    #[test]
    fn reset_forgets_everything() {
        let store = InmemStore::new();
        let kp = Keypair::from_seed(&[4u8; 32]);
        let (e0, m0) = event(&kp, 0, None);
        store.put_event(&e0, &m0).unwrap();
        store.reset().unwrap();
        assert_eq!(store.event_count().unwrap(), 0);
        assert!(store.known_events().unwrap().is_empty());
    }
}
