//! # Persistent Store
//!
//! sled-backed [`Store`], with a write-through cache in front of the hot
//! trees (events, metas, rounds).
//!
//! ## Tree Layout
//!
//! | Tree           | Key                              | Value               |
//! |----------------|----------------------------------|---------------------|
//! | `events`       | event hash (32B)                 | `bincode(Event)`    |
//! | `metas`        | event hash (32B)                 | `bincode(EventMeta)`|
//! | `participants` | creator (4B BE) ++ index (8B BE) | event hash (32B)    |
//! | `heads`        | creator (4B BE)                  | index (8B BE)       |
//! | `topo`         | topological index (8B BE)        | event hash (32B)    |
//! | `roots`        | root hash (32B)                  | `bincode(Root)`     |
//! | `rounds`       | round (8B BE)                    | `bincode(RoundInfo)`|
//! | `blocks`       | block index (8B BE)              | `bincode(Block)`    |
//! | `frames`       | round (8B BE)                    | `bincode(Frame)`    |
//! | `peer_sets`    | activation round (8B BE)         | `bincode(PeerSet)`  |
//!
//! Integers are big-endian so sled's lexicographic order is numeric order
//! and range scans work.
//!
//! ## Lifecycle
//!
//! - [`create`](PersistentStore::create) moves any existing database aside
//!   to `<path>--UTC--<timestamp>` and starts empty.
//! - [`load`](PersistentStore::load) reads the stored events in
//!   topological order, moves the database aside the same way and opens an
//!   empty one in its place, so the caller can replay the events through a
//!   fresh hashgraph and rebuild every derived value. Until the replay is
//!   flushed the backup is the only complete copy.

use serde::{de::DeserializeOwned, Serialize};
use sled::{Db, Tree};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use super::block::Block;
use super::cache::Cache;
use super::event::{Event, EventHash, EventMeta};
use super::frame::{Frame, Root};
use super::round::RoundInfo;
use super::store::{Store, StoreError, StoreResult};
use crate::peers::{PeerId, PeerSet};

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode_hash(bytes: &[u8]) -> StoreResult<EventHash> {
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| StoreError::Serialization(format!("bad hash length {}", bytes.len())))?;
    Ok(EventHash(arr))
}

fn decode_u64(bytes: &[u8]) -> StoreResult<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Serialization(format!("bad integer length {}", bytes.len())))?;
    Ok(u64::from_be_bytes(arr))
}

fn participant_key(creator: PeerId, index: u64) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..4].copy_from_slice(&creator.to_be_bytes());
    key[4..].copy_from_slice(&index.to_be_bytes());
    key
}

pub struct PersistentStore {
    db: Db,
    path: Option<PathBuf>,
    events: Tree,
    metas: Tree,
    participants: Tree,
    heads: Tree,
    topo: Tree,
    roots: Tree,
    rounds: Tree,
    blocks: Tree,
    frames: Tree,
    peer_sets: Tree,
    event_cache: Cache<EventHash, Event>,
    meta_cache: Cache<EventHash, EventMeta>,
    round_cache: Cache<u64, RoundInfo>,
}

impl PersistentStore {
    /// Open a fresh store at `path`. An existing database there is renamed
    /// out of the way first, never deleted.
    pub fn create(path: impl AsRef<Path>, cache_size: usize) -> StoreResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            let backup = backup_path(path);
            info!(from = %path.display(), to = %backup.display(), "backing up existing database");
            std::fs::rename(path, &backup)?;
        }
        let db = sled::open(path)?;
        Self::from_db(db, Some(path.to_path_buf()), cache_size)
    }

    /// Read every event stored at `path`, in topological order, then back
    /// the database up and return an empty store in its place.
    pub fn load(path: impl AsRef<Path>, cache_size: usize) -> StoreResult<(Self, Vec<Event>)> {
        let path = path.as_ref();
        if !path.exists() {
            let db = sled::open(path)?;
            return Ok((Self::from_db(db, Some(path.to_path_buf()), cache_size)?, Vec::new()));
        }

        let events = {
            let db = sled::open(path)?;
            let events = read_events(&db)?;
            db.flush()?;
            events
        };
        let backup = backup_path(path);
        std::fs::rename(path, &backup)?;
        info!(
            path = %path.display(),
            backup = %backup.display(),
            events = events.len(),
            "loaded persistent store"
        );

        let db = sled::open(path)?;
        Ok((Self::from_db(db, Some(path.to_path_buf()), cache_size)?, events))
    }

    /// A throwaway store that sled deletes on drop.
    pub fn open_temporary(cache_size: usize) -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db, None, cache_size)
    }

    fn from_db(db: Db, path: Option<PathBuf>, cache_size: usize) -> StoreResult<Self> {
        Ok(Self {
            events: db.open_tree("events")?,
            metas: db.open_tree("metas")?,
            participants: db.open_tree("participants")?,
            heads: db.open_tree("heads")?,
            topo: db.open_tree("topo")?,
            roots: db.open_tree("roots")?,
            rounds: db.open_tree("rounds")?,
            blocks: db.open_tree("blocks")?,
            frames: db.open_tree("frames")?,
            peer_sets: db.open_tree("peer_sets")?,
            event_cache: Cache::new(cache_size),
            meta_cache: Cache::new(cache_size),
            round_cache: Cache::new(cache_size),
            db,
            path,
        })
    }

    /// On-disk location, `None` for temporary stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn trees(&self) -> [&Tree; 10] {
        [
            &self.events,
            &self.metas,
            &self.participants,
            &self.heads,
            &self.topo,
            &self.roots,
            &self.rounds,
            &self.blocks,
            &self.frames,
            &self.peer_sets,
        ]
    }

    /// Record `(creator, index) -> hash` and advance the creator's head.
    fn put_participant(&self, creator: PeerId, index: u64, hash: &EventHash) -> StoreResult<()> {
        self.participants
            .insert(participant_key(creator, index), &hash.0[..])?;
        let head_key = creator.to_be_bytes();
        let advance = match self.heads.get(head_key)? {
            Some(current) => decode_u64(&current)? < index,
            None => true,
        };
        if advance {
            self.heads.insert(head_key, &index.to_be_bytes()[..])?;
        }
        Ok(())
    }
}

fn read_events(db: &Db) -> StoreResult<Vec<Event>> {
    let topo = db.open_tree("topo")?;
    let stored = db.open_tree("events")?;
    let mut events = Vec::new();
    for item in topo.iter() {
        let (_, hash) = item?;
        let hash = decode_hash(&hash)?;
        if let Some(bytes) = stored.get(hash.0)? {
            events.push(decode(&bytes)?);
        }
    }
    Ok(events)
}

fn backup_path(path: &Path) -> PathBuf {
    let stamp = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S%.3fZ");
    let mut name = path.as_os_str().to_os_string();
    name.push(format!("--UTC--{stamp}"));
    PathBuf::from(name)
}

impl Store for PersistentStore {
    fn cache_size(&self) -> usize {
        self.event_cache.capacity()
    }

    fn get_event(&self, hash: &EventHash) -> StoreResult<Option<Event>> {
        if let Some(event) = self.event_cache.get(hash) {
            return Ok(Some(event));
        }
        match self.events.get(hash.0)? {
            Some(bytes) => {
                let event: Event = decode(&bytes)?;
                self.event_cache.insert(*hash, event.clone());
                Ok(Some(event))
            }
            None => Ok(None),
        }
    }

    fn get_meta(&self, hash: &EventHash) -> StoreResult<Option<EventMeta>> {
        if let Some(meta) = self.meta_cache.get(hash) {
            return Ok(Some(meta));
        }
        match self.metas.get(hash.0)? {
            Some(bytes) => {
                let meta: EventMeta = decode(&bytes)?;
                self.meta_cache.insert(*hash, meta.clone());
                Ok(Some(meta))
            }
            None => Ok(None),
        }
    }

    fn put_event(&self, event: &Event, meta: &EventMeta) -> StoreResult<()> {
        let hash = event.hash();
        self.events.insert(hash.0, encode(event)?)?;
        self.metas.insert(hash.0, encode(meta)?)?;
        self.topo
            .insert(meta.topological_index.to_be_bytes(), &hash.0[..])?;
        self.put_participant(meta.creator_id, meta.index, &hash)?;
        self.event_cache.insert(hash, event.clone());
        self.meta_cache.insert(hash, meta.clone());
        Ok(())
    }

    fn put_meta(&self, hash: &EventHash, meta: &EventMeta) -> StoreResult<()> {
        self.metas.insert(hash.0, encode(meta)?)?;
        self.meta_cache.insert(*hash, meta.clone());
        Ok(())
    }

    fn participant_event(&self, creator: PeerId, index: u64) -> StoreResult<Option<EventHash>> {
        self.participants
            .get(participant_key(creator, index))?
            .map(|bytes| decode_hash(&bytes))
            .transpose()
    }

    fn last_event_from(&self, creator: PeerId) -> StoreResult<Option<(EventHash, u64)>> {
        let Some(index) = self.heads.get(creator.to_be_bytes())? else {
            return Ok(None);
        };
        let index = decode_u64(&index)?;
        Ok(self
            .participant_event(creator, index)?
            .map(|hash| (hash, index)))
    }

    fn known_events(&self) -> StoreResult<BTreeMap<PeerId, u64>> {
        let mut known = BTreeMap::new();
        for item in self.heads.iter() {
            let (key, value) = item?;
            let key: [u8; 4] = key
                .as_ref()
                .try_into()
                .map_err(|_| StoreError::Serialization("bad head key".into()))?;
            known.insert(PeerId::from_be_bytes(key), decode_u64(&value)?);
        }
        Ok(known)
    }

    fn topological_events(&self, from: u64, limit: usize) -> StoreResult<Vec<Event>> {
        let mut events = Vec::new();
        for item in self.topo.range(from.to_be_bytes()..).take(limit) {
            let (_, hash) = item?;
            if let Some(event) = self.get_event(&decode_hash(&hash)?)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    fn event_count(&self) -> StoreResult<u64> {
        Ok(self.topo.len() as u64)
    }

    fn put_root(&self, root: &Root) -> StoreResult<()> {
        self.roots.insert(root.hash.0, encode(root)?)?;
        self.put_participant(root.creator_id, root.index, &root.hash)
    }

    fn get_root(&self, hash: &EventHash) -> StoreResult<Option<Root>> {
        self.roots.get(hash.0)?.map(|b| decode(&b)).transpose()
    }

    fn get_round(&self, round: u64) -> StoreResult<Option<RoundInfo>> {
        if let Some(info) = self.round_cache.get(&round) {
            return Ok(Some(info));
        }
        match self.rounds.get(round.to_be_bytes())? {
            Some(bytes) => {
                let info: RoundInfo = decode(&bytes)?;
                self.round_cache.insert(round, info.clone());
                Ok(Some(info))
            }
            None => Ok(None),
        }
    }

    fn put_round(&self, round: u64, info: &RoundInfo) -> StoreResult<()> {
        self.rounds.insert(round.to_be_bytes(), encode(info)?)?;
        self.round_cache.insert(round, info.clone());
        Ok(())
    }

    fn delete_rounds_from(&self, round: u64) -> StoreResult<()> {
        let keys: Vec<_> = self
            .rounds
            .range(round.to_be_bytes()..)
            .keys()
            .collect::<Result<_, _>>()?;
        for key in keys {
            self.rounds.remove(key)?;
        }
        self.round_cache.retain(|r| *r < round);
        Ok(())
    }

    fn last_round(&self) -> StoreResult<Option<u64>> {
        self.rounds
            .last()?
            .map(|(key, _)| decode_u64(&key))
            .transpose()
    }

    fn get_block(&self, index: u64) -> StoreResult<Option<Block>> {
        self.blocks
            .get(index.to_be_bytes())?
            .map(|b| decode(&b))
            .transpose()
    }

    fn put_block(&self, block: &Block) -> StoreResult<()> {
        self.blocks
            .insert(block.index.to_be_bytes(), encode(block)?)?;
        Ok(())
    }

    fn last_block_index(&self) -> StoreResult<Option<u64>> {
        self.blocks
            .last()?
            .map(|(key, _)| decode_u64(&key))
            .transpose()
    }

    fn get_frame(&self, round: u64) -> StoreResult<Option<Frame>> {
        self.frames
            .get(round.to_be_bytes())?
            .map(|b| decode(&b))
            .transpose()
    }

    fn put_frame(&self, frame: &Frame) -> StoreResult<()> {
        self.frames
            .insert(frame.round.to_be_bytes(), encode(frame)?)?;
        Ok(())
    }

    fn put_peer_set(&self, peer_set: &PeerSet) -> StoreResult<()> {
        self.peer_sets
            .insert(peer_set.round().to_be_bytes(), encode(peer_set)?)?;
        Ok(())
    }

    fn peer_sets(&self) -> StoreResult<BTreeMap<u64, PeerSet>> {
        let mut sets = BTreeMap::new();
        for item in self.peer_sets.iter() {
            let (key, value) = item?;
            sets.insert(decode_u64(&key)?, decode(&value)?);
        }
        Ok(sets)
    }

    fn reset(&self) -> StoreResult<()> {
        for tree in self.trees() {
            tree.clear()?;
        }
        self.event_cache.clear();
        self.meta_cache.clear();
        self.round_cache.clear();
        Ok(())
    }

    fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    fn event(kp: &Keypair, index: u64, self_parent: Option<EventHash>) -> (Event, EventMeta) {
        let mut e = Event::new(vec![vec![index as u8]], vec![], self_parent, None, kp.public_key(), index);
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

    // -- 1. Events and chains -------------------------------------------------

    #[test]
    fn events_round_trip_through_sled() {
        let store = PersistentStore::open_temporary(2).unwrap();
        let kp = Keypair::from_seed(&[1u8; 32]);
        let (e0, m0) = event(&kp, 0, None);
        let (e1, m1) = event(&kp, 1, Some(e0.hash()));
        store.put_event(&e0, &m0).unwrap();
        store.put_event(&e1, &m1).unwrap();

        // Bypass the cache.
        store.event_cache.clear();
        assert_eq!(store.get_event(&e0.hash()).unwrap(), Some(e0.clone()));
        assert_eq!(store.get_meta(&e1.hash()).unwrap(), Some(m1));
        assert_eq!(
            store.last_event_from(e0.creator_id()).unwrap(),
            Some((e1.hash(), 1))
        );
        assert_eq!(store.topological_events(0, 10).unwrap(), vec![e0, e1]);
    }

    #[test]
    fn known_events_tracks_heads_including_roots() {
        let store = PersistentStore::open_temporary(0).unwrap();
        let root = Root {
            hash: EventHash([7u8; 32]),
            creator_id: 11,
            index: 4,
            round: 2,
            lamport: 9,
            last_ancestors: BTreeMap::from([(11, 4)]),
        };
        store.put_root(&root).unwrap();
        assert_eq!(store.known_events().unwrap(), BTreeMap::from([(11, 4)]));
        assert_eq!(store.get_root(&root.hash).unwrap(), Some(root));
    }

    // -- 2. Rounds -------------------------------------------------------------

    #[test]
    fn delete_rounds_from_clears_disk_and_cache() {
        let store = PersistentStore::open_temporary(16).unwrap();
        for r in 0..6 {
            store.put_round(r, &RoundInfo::default()).unwrap();
        }
        store.delete_rounds_from(2).unwrap();
        assert_eq!(store.last_round().unwrap(), Some(1));
        assert!(store.get_round(4).unwrap().is_none());
    }

    // -- 3. Lifecycle ----------------------------------------------------------

    #[test]
    fn create_backs_up_existing_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        {
            let store = PersistentStore::create(&path, 10).unwrap();
            store.put_peer_set(&PeerSet::new(vec![])).unwrap();
            store.flush().unwrap();
        }
        let _store = PersistentStore::create(&path, 10).unwrap();
        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("--UTC--"))
            .collect();
        assert_eq!(backups.len(), 1);
    }

    #[test]
    fn load_keeps_a_backup_until_the_replay_lands() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let kp = Keypair::from_seed(&[3u8; 32]);
        let (e0, m0) = event(&kp, 0, None);
        {
            let store = PersistentStore::create(&path, 10).unwrap();
            store.put_event(&e0, &m0).unwrap();
            store.flush().unwrap();
        }
        // The node dies before replaying anything.
        drop(PersistentStore::load(&path, 10).unwrap());

        let backup = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .find(|e| e.file_name().to_string_lossy().contains("--UTC--"))
            .expect("no backup")
            .path();
        let db = sled::open(&backup).unwrap();
        assert_eq!(read_events(&db).unwrap(), vec![e0]);
    }

    #[test]
    fn load_of_a_missing_database_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (store, events) = PersistentStore::load(dir.path().join("db"), 10).unwrap();
        assert!(events.is_empty());
        assert_eq!(store.event_count().unwrap(), 0);
    }

    #[test]
    fn load_returns_events_in_order_and_empties_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let kp = Keypair::from_seed(&[2u8; 32]);
        let (e0, m0) = event(&kp, 0, None);
        let (e1, m1) = event(&kp, 1, Some(e0.hash()));
        {
            let store = PersistentStore::create(&path, 10).unwrap();
            store.put_event(&e0, &m0).unwrap();
            store.put_event(&e1, &m1).unwrap();
            store.put_block(&Block::new(0, 1, [0; 32], [0; 32], vec![], vec![])).unwrap();
            store.flush().unwrap();
        }
        let (store, events) = PersistentStore::load(&path, 10).unwrap();
        assert_eq!(events, vec![e0, e1]);
        assert_eq!(store.event_count().unwrap(), 0);
        assert!(store.last_block_index().unwrap().is_none());
    }
}
