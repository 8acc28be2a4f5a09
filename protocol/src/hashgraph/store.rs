//! # Store Contract
//!
//! Everything the hashgraph persists goes through [`Store`]. Two
//! implementations ship with the crate:
//!
//! - [`InmemStore`](super::InmemStore): hash maps behind a lock, for
//!   ephemeral nodes and tests.
//! - [`PersistentStore`](super::PersistentStore): sled trees behind LRU
//!   caches, for nodes that must survive a restart.
//!
//! Methods take `&self`; implementations provide their own interior
//! locking so committed blocks and peer sets can be read from outside the
//! consensus task while it keeps writing.
//!
//! Roots (see [`Frame`]) live alongside events: they occupy a slot in their
//! creator's chain, so `last_event_from` and `known_events` account for
//! them, but `get_event` never returns them.

use std::collections::BTreeMap;

use super::block::Block;
use super::event::{Event, EventHash, EventMeta};
use super::frame::{Frame, Root};
use super::round::RoundInfo;
use crate::peers::{PeerId, PeerSet};

/// Errors that can occur in a store. All of them are fatal to the node.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub trait Store: Send + Sync {
    /// Capacity of each cache in front of the backend, 0 if uncached.
    fn cache_size(&self) -> usize;

    // -- Events ---------------------------------------------------------

    fn get_event(&self, hash: &EventHash) -> StoreResult<Option<Event>>;

    fn get_meta(&self, hash: &EventHash) -> StoreResult<Option<EventMeta>>;

    /// Add a new event. Records it at `meta.topological_index` and in its
    /// creator's chain at `meta.index`.
    fn put_event(&self, event: &Event, meta: &EventMeta) -> StoreResult<()>;

    /// Overwrite the derived data of an existing event.
    fn put_meta(&self, hash: &EventHash, meta: &EventMeta) -> StoreResult<()>;

    /// Hash of the event (or root) at `index` in `creator`'s chain.
    fn participant_event(&self, creator: PeerId, index: u64) -> StoreResult<Option<EventHash>>;

    /// Hash and index of the creator's latest event or root.
    fn last_event_from(&self, creator: PeerId) -> StoreResult<Option<(EventHash, u64)>>;

    /// Latest known index for every creator.
    fn known_events(&self) -> StoreResult<BTreeMap<PeerId, u64>>;

    /// Events in insertion order, starting at topological index `from`.
    fn topological_events(&self, from: u64, limit: usize) -> StoreResult<Vec<Event>>;

    fn event_count(&self) -> StoreResult<u64>;

    // -- Roots ----------------------------------------------------------

    fn put_root(&self, root: &Root) -> StoreResult<()>;

    fn get_root(&self, hash: &EventHash) -> StoreResult<Option<Root>>;

    // -- Rounds ---------------------------------------------------------

    fn get_round(&self, round: u64) -> StoreResult<Option<RoundInfo>>;

    fn put_round(&self, round: u64, info: &RoundInfo) -> StoreResult<()>;

    /// Drop every round at or above `round`.
    fn delete_rounds_from(&self, round: u64) -> StoreResult<()>;

    fn last_round(&self) -> StoreResult<Option<u64>>;

    // -- Blocks & frames ------------------------------------------------

    fn get_block(&self, index: u64) -> StoreResult<Option<Block>>;

    fn put_block(&self, block: &Block) -> StoreResult<()>;

    fn last_block_index(&self) -> StoreResult<Option<u64>>;

    fn get_frame(&self, round: u64) -> StoreResult<Option<Frame>>;

    fn put_frame(&self, frame: &Frame) -> StoreResult<()>;

    // -- Peer sets ------------------------------------------------------

    fn put_peer_set(&self, peer_set: &PeerSet) -> StoreResult<()>;

    /// Every peer-set version, keyed by activation round.
    fn peer_sets(&self) -> StoreResult<BTreeMap<u64, PeerSet>>;

    // -- Lifecycle ------------------------------------------------------

    /// Forget everything. Used before installing a fast-forward frame.
    fn reset(&self) -> StoreResult<()>;

    fn flush(&self) -> StoreResult<()>;
}
