//! # Hashgraph
//!
//! The event DAG and the virtual-voting algorithm that turns it into an
//! ordered sequence of blocks.
//!
//! ## Pipeline
//!
//! ```text
//! insert_event ──► divide_rounds ──► decide_fame ──► decide_round_received
//!                                                         │
//!                      apply_commit ◄── app ◄── create_next_block
//!                           │
//!                           └──► apply_membership_changes ──► next PeerSet
//! ```
//!
//! - **insert_event** validates an event against the DAG, computes its
//!   Lamport timestamp and ancestry vectors, and queues it for division.
//! - **divide_rounds** assigns rounds and witness flags in insertion order.
//! - **decide_fame** runs virtual voting on the oldest undecided round.
//! - **decide_round_received** hands undetermined events to the oldest
//!   decided round once all of its famous witnesses see them.
//! - **create_next_block** turns that round into a pending [`Block`].
//!
//! Rounds are processed strictly one at a time. The block of round `r` is
//! committed, and any membership change it carries applied, before the fame
//! of round `r + 1` is looked at. Membership changes activate at
//! `r + membership_anchor_offset`, so every node resolves every round with
//! the same peer set.
//!
//! ## Ancestry
//!
//! Each event carries two per-creator vectors (see [`EventMeta`]):
//!
//! - `last_ancestors[p]`: highest index of `p`'s events reachable from it;
//! - `first_descendants[p]`: lowest index of `p`'s events that reach it.
//!
//! `x` sees `y` iff `x.last_ancestors[creator(y)] >= index(y)`. `x` strongly
//! sees `y` iff, for a supermajority of peers `p`,
//! `x.last_ancestors[p] >= y.first_descendants[p]`, i.e. some event of `p`
//! lies on a path from `y` to `x`. Both are map lookups; nothing walks the
//! graph recursively.

pub mod block;
pub mod cache;
pub mod event;
pub mod frame;
pub mod inmem_store;
pub mod internal_tx;
pub mod persistent_store;
pub mod round;
pub mod store;

pub use block::Block;
pub use event::{Event, EventBody, EventHash, EventMeta};
pub use frame::{Frame, FrameEvent, FrameWitness, Root};
pub use inmem_store::InmemStore;
pub use internal_tx::{
    InternalTransaction, InternalTransactionBody, InternalTransactionReceipt, TransactionType,
};
pub use persistent_store::PersistentStore;
pub use round::{RoundInfo, Trilean};
pub use store::{Store, StoreError, StoreResult};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::config::{
    NodeConfig, DEFAULT_COIN_ROUND_FREQUENCY, DEFAULT_MEMBERSHIP_ANCHOR_OFFSET, FRAME_DEPTH,
};
use crate::peers::{PeerId, PeerSet};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why an event was refused by [`Hashgraph::insert_event`]. These are
/// per-event failures: the event is dropped and gossip carries on.
#[derive(Debug, thiserror::Error)]
pub enum InsertError {
    #[error("event {0} already known")]
    Duplicate(EventHash),

    #[error("event {0} has an invalid signature")]
    BadSignature(EventHash),

    #[error("event {0} carries an internal transaction with an invalid signature")]
    InvalidInternalTransaction(EventHash),

    #[error("creator {0} is not a member of the active peer set")]
    NotMember(PeerId),

    #[error("parent {0} is unknown")]
    UnknownParent(EventHash),

    #[error("creator {creator} expected index {expected}, got {got}")]
    OutOfSequence { creator: PeerId, expected: u64, got: u64 },

    #[error("event {0} does not extend its creator's last event")]
    SelfParentMismatch(EventHash),

    #[error("event {0} has no other-parent")]
    MissingOtherParent(EventHash),
}

#[derive(Debug, thiserror::Error)]
pub enum HashgraphError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid event: {0}")]
    Insert(#[from] InsertError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("no peer set registered")]
    NoPeerSet,

    #[error("event {0} not found")]
    MissingEvent(EventHash),

    #[error("no event at index {index} of creator {creator}")]
    MissingParticipantEvent { creator: PeerId, index: u64 },

    #[error("event {0} has not been assigned a round")]
    NotDivided(EventHash),

    #[error("round {0} not found")]
    MissingRound(u64),

    #[error("no frame for round {0}")]
    MissingFrame(u64),

    #[error("frame does not match block {0}")]
    FrameMismatch(u64),
}

impl HashgraphError {
    /// A single bad event rather than a broken node.
    pub fn is_validation(&self) -> bool {
        matches!(self, HashgraphError::Insert(_))
    }
}

pub type HashgraphResult<T> = Result<T, HashgraphError>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Consensus parameters. Every node of a network must use the same values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashgraphConfig {
    /// Every `coin_round_frequency`-th voting round is a coin round.
    pub coin_round_frequency: u64,
    /// Rounds between the block that accepts a membership change and the
    /// round where it takes effect.
    pub membership_anchor_offset: u64,
}

impl Default for HashgraphConfig {
    fn default() -> Self {
        Self {
            coin_round_frequency: DEFAULT_COIN_ROUND_FREQUENCY,
            membership_anchor_offset: DEFAULT_MEMBERSHIP_ANCHOR_OFFSET,
        }
    }
}

impl From<&NodeConfig> for HashgraphConfig {
    fn from(config: &NodeConfig) -> Self {
        Self {
            coin_round_frequency: config.coin_round_frequency.max(2),
            membership_anchor_offset: config.membership_anchor_offset.max(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Hashgraph
// ---------------------------------------------------------------------------

/// What insertion needs to know about a parent, whether it is a stored
/// event or a frame root.
struct ParentInfo {
    round: Option<u64>,
    lamport: u64,
    last_ancestors: BTreeMap<PeerId, u64>,
}

pub struct Hashgraph {
    store: Arc<dyn Store>,
    config: HashgraphConfig,
    /// Peer-set history keyed by activation round. Mirrors the store.
    peer_sets: BTreeMap<u64, PeerSet>,
    /// Inserted but not yet divided, in topological order.
    pending_division: Vec<EventHash>,
    /// Divided but without a round-received, in topological order.
    undetermined: Vec<EventHash>,
    last_consensus_round: Option<u64>,
    /// Lowest round for which witness information is complete. Non-zero
    /// only after a reset from a frame.
    horizon: u64,
    last_block_index: Option<u64>,
    next_topological_index: u64,
    last_consensus_events: BTreeMap<PeerId, (u64, EventHash)>,
    consensus_events: u64,
    consensus_transactions: u64,
    pending_loaded_events: u64,
    coin_flips: u64,
}

impl Hashgraph {
    /// A hashgraph over `store` whose first validator set is `genesis`.
    pub fn new(
        store: Arc<dyn Store>,
        genesis: PeerSet,
        config: HashgraphConfig,
    ) -> HashgraphResult<Self> {
        let mut hg = Self {
            store,
            config,
            peer_sets: BTreeMap::new(),
            pending_division: Vec::new(),
            undetermined: Vec::new(),
            last_consensus_round: None,
            horizon: 0,
            last_block_index: None,
            next_topological_index: 0,
            last_consensus_events: BTreeMap::new(),
            consensus_events: 0,
            consensus_transactions: 0,
            pending_loaded_events: 0,
            coin_flips: 0,
        };
        hg.register_peer_set(genesis.at_round(0))?;
        Ok(hg)
    }

    // -- Accessors ------------------------------------------------------

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn config(&self) -> HashgraphConfig {
        self.config
    }

    pub fn last_consensus_round(&self) -> Option<u64> {
        self.last_consensus_round
    }

    pub fn last_block_index(&self) -> Option<u64> {
        self.last_block_index
    }

    pub fn last_round(&self) -> HashgraphResult<Option<u64>> {
        Ok(self.store.last_round()?)
    }

    pub fn undetermined_events(&self) -> usize {
        self.undetermined.len()
    }

    pub fn consensus_events(&self) -> u64 {
        self.consensus_events
    }

    pub fn consensus_transactions(&self) -> u64 {
        self.consensus_transactions
    }

    /// Events carrying transactions that have not reached consensus yet.
    pub fn pending_loaded_events(&self) -> u64 {
        self.pending_loaded_events
    }

    /// Votes taken from a signature bit because a coin round had no
    /// supermajority.
    pub fn coin_flips(&self) -> u64 {
        self.coin_flips
    }

    pub fn peer_sets(&self) -> &BTreeMap<u64, PeerSet> {
        &self.peer_sets
    }

    /// The newest peer-set version, possibly not active yet.
    pub fn latest_peer_set(&self) -> HashgraphResult<&PeerSet> {
        self.peer_sets
            .values()
            .next_back()
            .ok_or(HashgraphError::NoPeerSet)
    }

    /// The version active at `round`.
    pub fn peer_set_at(&self, round: u64) -> HashgraphResult<&PeerSet> {
        self.peer_sets
            .range(..=round)
            .next_back()
            .or_else(|| self.peer_sets.iter().next())
            .map(|(_, ps)| ps)
            .ok_or(HashgraphError::NoPeerSet)
    }

    pub fn known_events(&self) -> HashgraphResult<BTreeMap<PeerId, u64>> {
        Ok(self.store.known_events()?)
    }

    /// Hash and index of `creator`'s latest event or root.
    pub fn last_event_from(&self, creator: PeerId) -> HashgraphResult<Option<(EventHash, u64)>> {
        Ok(self.store.last_event_from(creator)?)
    }

    fn meta(&self, hash: &EventHash) -> HashgraphResult<EventMeta> {
        self.store
            .get_meta(hash)?
            .ok_or(HashgraphError::MissingEvent(*hash))
    }

    fn round_info(&self, round: u64) -> HashgraphResult<RoundInfo> {
        Ok(self.store.get_round(round)?.unwrap_or_default())
    }

    /// Whether `x` has `y` as an ancestor.
    pub fn see(&self, x: &EventHash, y: &EventHash) -> HashgraphResult<bool> {
        let y = self.meta(y)?;
        Ok(self.meta(x)?.sees(y.creator_id, y.index))
    }

    /// Whether `x` strongly sees `y`, measured against the peer set of
    /// `y`'s round.
    pub fn strongly_see(&self, x: &EventHash, y: &EventHash) -> HashgraphResult<bool> {
        let (xm, ym) = (self.meta(x)?, self.meta(y)?);
        let round = ym.round.ok_or(HashgraphError::NotDivided(*y))?;
        Ok(strongly_sees(&xm, &ym, self.peer_set_at(round)?))
    }

    pub fn round(&self, x: &EventHash) -> HashgraphResult<Option<u64>> {
        Ok(self.meta(x)?.round)
    }

    pub fn witness(&self, x: &EventHash) -> HashgraphResult<bool> {
        Ok(self.meta(x)?.witness)
    }

    pub fn fame(&self, x: &EventHash) -> HashgraphResult<Trilean> {
        let meta = self.meta(x)?;
        match meta.round {
            Some(r) if meta.witness => Ok(self
                .round_info(r)?
                .witnesses
                .get(x)
                .copied()
                .unwrap_or_default()),
            _ => Ok(Trilean::Undefined),
        }
    }

    pub fn round_received(&self, x: &EventHash) -> HashgraphResult<Option<u64>> {
        Ok(self.meta(x)?.round_received)
    }

    // -- Peer sets ------------------------------------------------------

    fn register_peer_set(&mut self, peer_set: PeerSet) -> HashgraphResult<()> {
        self.store.put_peer_set(&peer_set)?;
        self.peer_sets.insert(peer_set.round(), peer_set);
        Ok(())
    }

    /// Activation round of the first version that lists `creator`.
    fn first_membership_round(&self, creator: PeerId) -> Option<u64> {
        self.peer_sets
            .iter()
            .find(|(_, ps)| ps.contains(creator))
            .map(|(r, _)| *r)
    }

    // -- Insertion ------------------------------------------------------

    fn parent_info(&self, hash: &EventHash) -> HashgraphResult<Option<ParentInfo>> {
        if let Some(meta) = self.store.get_meta(hash)? {
            return Ok(Some(ParentInfo {
                round: meta.round,
                lamport: meta.lamport,
                last_ancestors: meta.last_ancestors,
            }));
        }
        Ok(self.store.get_root(hash)?.map(|root| ParentInfo {
            round: Some(root.round),
            lamport: root.lamport,
            last_ancestors: root.last_ancestors,
        }))
    }

    /// Validate `event` and add it to the DAG. Rounds are assigned later by
    /// [`divide_rounds`](Self::divide_rounds).
    pub fn insert_event(&mut self, event: Event) -> HashgraphResult<EventHash> {
        let hash = event.hash();
        let creator = event.creator_id();

        if self.store.get_meta(&hash)?.is_some() || self.store.get_root(&hash)?.is_some() {
            return Err(InsertError::Duplicate(hash).into());
        }
        if !event.body.creator.verify(&hash.0, &event.signature) {
            return Err(InsertError::BadSignature(hash).into());
        }
        if !event.internal_transactions().iter().all(|itx| itx.verify()) {
            return Err(InsertError::InvalidInternalTransaction(hash).into());
        }

        match self.store.last_event_from(creator)? {
            Some((last_hash, last_index)) => {
                if event.index() != last_index + 1 {
                    return Err(InsertError::OutOfSequence {
                        creator,
                        expected: last_index + 1,
                        got: event.index(),
                    }
                    .into());
                }
                if event.self_parent() != Some(last_hash) {
                    return Err(InsertError::SelfParentMismatch(hash).into());
                }
            }
            None => {
                if event.index() != 0 {
                    return Err(InsertError::OutOfSequence {
                        creator,
                        expected: 0,
                        got: event.index(),
                    }
                    .into());
                }
                if event.self_parent().is_some() {
                    return Err(InsertError::SelfParentMismatch(hash).into());
                }
            }
        }

        let self_parent = match event.self_parent() {
            Some(h) => Some(
                self.parent_info(&h)?
                    .ok_or(InsertError::UnknownParent(h))?,
            ),
            None => None,
        };
        let other_parent = match event.other_parent() {
            Some(h) => Some(
                self.parent_info(&h)?
                    .ok_or(InsertError::UnknownParent(h))?,
            ),
            None => None,
        };

        let member = match self_parent.as_ref().and_then(|p| p.round) {
            Some(round) => self.peer_set_at(round)?.contains(creator),
            None => self.peer_sets.values().any(|ps| ps.contains(creator)),
        };
        if !member {
            return Err(InsertError::NotMember(creator).into());
        }

        if other_parent.is_none() && event.index() > 0 {
            let alone = self
                .peer_sets
                .values()
                .rev()
                .find(|ps| ps.contains(creator))
                .is_some_and(|ps| ps.len() == 1);
            if !alone {
                return Err(InsertError::MissingOtherParent(hash).into());
            }
        }

        let mut last_ancestors = BTreeMap::new();
        let mut lamport = 0;
        for parent in self_parent.iter().chain(other_parent.iter()) {
            lamport = lamport.max(parent.lamport + 1);
            for (&p, &idx) in &parent.last_ancestors {
                let entry = last_ancestors.entry(p).or_insert(idx);
                *entry = (*entry).max(idx);
            }
        }
        last_ancestors.insert(creator, event.index());

        let meta = EventMeta {
            creator_id: creator,
            index: event.index(),
            self_parent: event.self_parent(),
            other_parent: event.other_parent(),
            topological_index: self.next_topological_index,
            lamport,
            round: None,
            witness: false,
            last_ancestors,
            first_descendants: BTreeMap::from([(creator, event.index())]),
            round_received: None,
            consensus_timestamp: None,
            loaded: event.is_loaded(),
        };
        self.next_topological_index += 1;

        self.store.put_event(&event, &meta)?;
        self.update_first_descendants(&meta)?;

        if meta.loaded {
            self.pending_loaded_events += 1;
        }
        self.pending_division.push(hash);
        debug!(event = %hash.short(), creator, index = meta.index, lamport, "inserted event");
        Ok(hash)
    }

    /// Record the new event as first descendant on every ancestor that has
    /// none from its creator yet. Ancestors of `p` are exactly `p`'s events
    /// up to `last_ancestors[p]`; once one already has an entry, all older
    /// ones do too.
    fn update_first_descendants(&self, meta: &EventMeta) -> HashgraphResult<()> {
        for (&p, &last) in &meta.last_ancestors {
            if p == meta.creator_id {
                continue;
            }
            let mut index = last;
            loop {
                let Some(hash) = self.store.participant_event(p, index)? else {
                    break;
                };
                // Roots are never updated: nothing below the horizon matters.
                let Some(mut ancestor) = self.store.get_meta(&hash)? else {
                    break;
                };
                if ancestor.first_descendants.contains_key(&meta.creator_id) {
                    break;
                }
                ancestor
                    .first_descendants
                    .insert(meta.creator_id, meta.index);
                self.store.put_meta(&hash, &ancestor)?;
                if index == 0 {
                    break;
                }
                index -= 1;
            }
        }
        Ok(())
    }

    // -- Rounds ---------------------------------------------------------

    /// Round of a parent that must already have been divided.
    fn divided_round(&self, hash: &EventHash) -> HashgraphResult<u64> {
        match self.parent_info(hash)? {
            Some(ParentInfo { round: Some(r), .. }) => Ok(r),
            Some(_) => Err(HashgraphError::NotDivided(*hash)),
            None => Err(HashgraphError::MissingEvent(*hash)),
        }
    }

    /// Assign rounds and witness flags to every pending event, in the order
    /// they were inserted.
    pub fn divide_rounds(&mut self) -> HashgraphResult<()> {
        if self.pending_division.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.pending_division);
        let mut witness_cache: HashMap<u64, Vec<EventMeta>> = HashMap::new();

        for hash in pending {
            let mut meta = self.meta(&hash)?;

            let self_parent_round = match meta.self_parent {
                Some(h) => Some(self.divided_round(&h)?),
                None => None,
            };
            let other_parent_round = match meta.other_parent {
                Some(h) => Some(self.divided_round(&h)?),
                None => None,
            };

            let round = match self_parent_round.max(other_parent_round) {
                None => self.first_membership_round(meta.creator_id).unwrap_or(0),
                Some(r) if r < self.horizon => r,
                Some(r) => {
                    if !witness_cache.contains_key(&r) {
                        // A witness known only through a frame cannot be
                        // strongly seen until it arrives.
                        let mut metas = Vec::new();
                        for w in self.round_info(r)?.witness_hashes() {
                            if let Some(m) = self.store.get_meta(&w)? {
                                metas.push(m);
                            }
                        }
                        witness_cache.insert(r, metas);
                    }
                    let witnesses = &witness_cache[&r];
                    let peer_set = self.peer_set_at(r)?;
                    let strongly_seen = witnesses
                        .iter()
                        .filter(|w| strongly_sees(&meta, w, peer_set))
                        .count();
                    if strongly_seen >= peer_set.super_majority() {
                        r + 1
                    } else {
                        r
                    }
                }
            };

            let witness = self_parent_round.map_or(true, |sp| round > sp)
                && self.peer_set_at(round)?.contains(meta.creator_id);

            meta.round = Some(round);
            meta.witness = witness;
            self.store.put_meta(&hash, &meta)?;

            // Witnesses arriving in an already decided round can no longer
            // be famous.
            let fame = match self.last_consensus_round {
                Some(lcr) if witness && round <= lcr => Trilean::False,
                _ => Trilean::Undefined,
            };
            let mut info = self.round_info(round)?;
            info.add_event(hash, witness, fame);
            self.store.put_round(round, &info)?;
            if witness {
                witness_cache.remove(&round);
            }

            self.undetermined.push(hash);
            debug!(event = %hash.short(), round, witness, "divided event");
        }
        Ok(())
    }

    /// Oldest round without a block.
    fn front_round(&self) -> u64 {
        self.last_consensus_round.map_or(0, |r| r + 1)
    }

    // -- Fame -----------------------------------------------------------

    /// Virtual voting on the witnesses of the oldest undecided round.
    pub fn decide_fame(&mut self) -> HashgraphResult<()> {
        let front = self.front_round();
        let Some(mut info) = self.store.get_round(front)? else {
            return Ok(());
        };
        if info.decided {
            return Ok(());
        }
        let Some(last_round) = self.store.last_round()? else {
            return Ok(());
        };

        // Witness metas of every later round, fetched once.
        let mut later: BTreeMap<u64, Vec<(EventHash, EventMeta)>> = BTreeMap::new();
        for j in front..=last_round {
            let mut metas = Vec::new();
            for w in self.round_info(j)?.witness_hashes() {
                if let Some(m) = self.store.get_meta(&w)? {
                    metas.push((w, m));
                }
            }
            later.insert(j, metas);
        }

        let mut votes: HashMap<(EventHash, EventHash), bool> = HashMap::new();
        for x in info.undecided_witnesses() {
            let xm = self.meta(&x)?;
            'voting: for j in (front + 1)..=last_round {
                let diff = j - front;
                let voters = &later[&j];
                for (y, ym) in voters {
                    if diff == 1 {
                        votes.insert((*y, x), ym.sees(xm.creator_id, xm.index));
                        continue;
                    }
                    let peer_set = self.peer_set_at(j - 1)?;
                    let (mut yays, mut nays) = (0usize, 0usize);
                    for (w, wm) in &later[&(j - 1)] {
                        if !strongly_sees(ym, wm, peer_set) {
                            continue;
                        }
                        match votes.get(&(*w, x)) {
                            Some(true) => yays += 1,
                            Some(false) => nays += 1,
                            None => {}
                        }
                    }
                    let vote = yays >= nays;
                    let tally = yays.max(nays);
                    let super_majority = peer_set.super_majority();

                    if diff % self.config.coin_round_frequency != 0 {
                        if tally >= super_majority {
                            info.set_fame(x, vote);
                            debug!(witness = %x.short(), round = front, famous = vote, "fame decided");
                            break 'voting;
                        }
                        votes.insert((*y, x), vote);
                    } else if tally >= super_majority {
                        votes.insert((*y, x), vote);
                    } else {
                        let event = self
                            .store
                            .get_event(y)?
                            .ok_or(HashgraphError::MissingEvent(*y))?;
                        self.coin_flips += 1;
                        trace!(witness = %x.short(), voter = %y.short(), "coin round vote");
                        votes.insert((*y, x), event.signature.middle_bit());
                    }
                }
            }
        }

        if info.witnesses_decided() {
            info.decided = true;
            debug!(round = front, famous = info.famous_witnesses().len(), "round decided");
        }
        self.store.put_round(front, &info)?;
        Ok(())
    }

    // -- Round received -------------------------------------------------

    /// Assign the oldest decided round as round-received to every
    /// undetermined event that all of its famous witnesses see. Calling it
    /// again is a no-op.
    pub fn decide_round_received(&mut self) -> HashgraphResult<()> {
        let front = self.front_round();
        let Some(mut info) = self.store.get_round(front)? else {
            return Ok(());
        };
        if !info.decided {
            return Ok(());
        }
        let famous = info
            .famous_witnesses()
            .into_iter()
            .map(|w| self.meta(&w))
            .collect::<HashgraphResult<Vec<_>>>()?;
        if famous.is_empty() {
            return Ok(());
        }

        let mut remaining = Vec::with_capacity(self.undetermined.len());
        let mut received = 0usize;
        for hash in std::mem::take(&mut self.undetermined) {
            let mut meta = self.meta(&hash)?;
            let below = meta.round.is_some_and(|r| r < front);
            if !below || !famous.iter().all(|w| w.sees(meta.creator_id, meta.index)) {
                remaining.push(hash);
                continue;
            }

            let mut timestamps = Vec::with_capacity(famous.len());
            for w in &famous {
                timestamps.push(self.first_descendant_lamport(&meta, w.creator_id)?);
            }
            timestamps.sort_unstable();

            meta.round_received = Some(front);
            meta.consensus_timestamp = Some(timestamps[timestamps.len() / 2]);
            self.store.put_meta(&hash, &meta)?;
            info.received_events.push(hash);
            received += 1;
        }
        self.undetermined = remaining;

        if received > 0 {
            self.store.put_round(front, &info)?;
            debug!(round = front, received, "events received");
        }
        Ok(())
    }

    /// Lamport timestamp of the first event of `peer` that sees `meta`.
    fn first_descendant_lamport(&self, meta: &EventMeta, peer: PeerId) -> HashgraphResult<u64> {
        let index = *meta
            .first_descendants
            .get(&peer)
            .ok_or(HashgraphError::MissingParticipantEvent { creator: peer, index: meta.index })?;
        let hash = self
            .store
            .participant_event(peer, index)?
            .ok_or(HashgraphError::MissingParticipantEvent { creator: peer, index })?;
        if let Some(m) = self.store.get_meta(&hash)? {
            return Ok(m.lamport);
        }
        self.store
            .get_root(&hash)?
            .map(|r| r.lamport)
            .ok_or(HashgraphError::MissingEvent(hash))
    }

    /// One pass of the consensus pipeline over everything inserted so far.
    pub fn run_consensus(&mut self) -> HashgraphResult<()> {
        self.divide_rounds()?;
        self.decide_fame()?;
        self.decide_round_received()
    }

    // -- Blocks ---------------------------------------------------------

    /// Retire decided rounds until one yields a block. Returns `None` when
    /// the oldest pending round is still undecided.
    ///
    /// The caller must commit the returned block, and pass the result to
    /// [`apply_commit`](Self::apply_commit), before calling this again.
    pub fn create_next_block(&mut self) -> HashgraphResult<Option<Block>> {
        loop {
            let front = self.front_round();
            match self.store.get_round(front)? {
                Some(info) if info.decided => {}
                _ => return Ok(None),
            }
            self.decide_round_received()?;
            let info = self.round_info(front)?;
            self.last_consensus_round = Some(front);

            if info.received_events.is_empty() {
                self.decide_fame()?;
                self.decide_round_received()?;
                continue;
            }
            return self.create_block(front).map(Some);
        }
    }

    /// Build the pending block of `round` from the events it received.
    ///
    /// Consensus order is `(consensus_timestamp, lamport, hash)`. Lamport
    /// before hash keeps ties in an order that respects the DAG.
    pub fn create_block(&mut self, round: u64) -> HashgraphResult<Block> {
        let mut info = self
            .store
            .get_round(round)?
            .ok_or(HashgraphError::MissingRound(round))?;

        let mut received = info
            .received_events
            .iter()
            .map(|h| self.meta(h).map(|m| (*h, m)))
            .collect::<HashgraphResult<Vec<_>>>()?;
        received.sort_by(|(ha, a), (hb, b)| {
            (a.consensus_timestamp, a.lamport, ha).cmp(&(b.consensus_timestamp, b.lamport, hb))
        });

        let mut transactions = Vec::new();
        let mut internal_transactions = Vec::new();
        for (hash, meta) in &received {
            let event = self
                .store
                .get_event(hash)?
                .ok_or(HashgraphError::MissingEvent(*hash))?;
            transactions.extend(event.body.transactions);
            internal_transactions.extend(event.body.internal_transactions);

            let newer = self
                .last_consensus_events
                .get(&meta.creator_id)
                .map_or(true, |(idx, _)| meta.index > *idx);
            if newer {
                self.last_consensus_events
                    .insert(meta.creator_id, (meta.index, *hash));
            }
            if meta.loaded {
                self.pending_loaded_events = self.pending_loaded_events.saturating_sub(1);
            }
        }
        self.consensus_events += received.len() as u64;

        info.received_events = received.iter().map(|(h, _)| *h).collect();
        self.store.put_round(round, &info)?;

        let frame = self.build_frame(round)?;
        let frame_hash = frame.hash()?;
        self.store.put_frame(&frame)?;

        let peers_hash = self.peer_set_at(round)?.hash();
        let index = self.last_block_index.map_or(0, |i| i + 1);
        self.last_block_index = Some(index);

        info!(
            index,
            round_received = round,
            events = received.len(),
            transactions = transactions.len(),
            "created block"
        );
        Ok(Block::new(
            index,
            round,
            frame_hash,
            peers_hash,
            transactions,
            internal_transactions,
        ))
    }

    /// Record the application's verdict on a pending block, persist it and
    /// apply any membership change it accepted. Returns the committed block.
    pub fn apply_commit(
        &mut self,
        mut block: Block,
        state_hash: [u8; 32],
        receipts: Vec<InternalTransactionReceipt>,
    ) -> HashgraphResult<Block> {
        block.state_hash = state_hash;
        block.internal_transaction_receipts = receipts
            .into_iter()
            .filter(|r| block.internal_transactions.contains(&r.internal_transaction))
            .collect();
        self.store.put_block(&block)?;
        self.consensus_transactions += block.transactions.len() as u64;

        self.apply_membership_changes(block.round_received, &block.internal_transaction_receipts)?;
        Ok(block)
    }

    /// Fold the accepted receipts of the block received in `round` into a
    /// new peer-set version active at `round + membership_anchor_offset`.
    ///
    /// Rounds at or past the anchor were computed with the old set, so they
    /// are discarded and their events queued for division again. Decisions
    /// for earlier rounds are untouched.
    pub fn apply_membership_changes(
        &mut self,
        round: u64,
        receipts: &[InternalTransactionReceipt],
    ) -> HashgraphResult<Option<PeerSet>> {
        let accepted: Vec<_> = receipts.iter().filter(|r| r.accepted).collect();
        if accepted.is_empty() {
            return Ok(None);
        }

        let latest = self.latest_peer_set()?.clone();
        let mut peers = latest.peers().to_vec();
        for receipt in &accepted {
            let peer = &receipt.internal_transaction.body.peer;
            match receipt.internal_transaction.body.kind {
                TransactionType::PeerAdd => {
                    if peers.iter().any(|p| p.pub_key == peer.pub_key) {
                        continue;
                    }
                    if peers.iter().any(|p| p.id() == peer.id()) {
                        warn!(round, peer = peer.id(), "joining peer id collides with a member, ignoring");
                        continue;
                    }
                    peers.push(peer.clone());
                }
                TransactionType::PeerRemove => peers.retain(|p| p.pub_key != peer.pub_key),
            }
        }

        if peers.is_empty() {
            warn!(round, "membership change would empty the peer set, ignoring");
            return Ok(None);
        }
        let anchor = round + self.config.membership_anchor_offset;
        let next = latest.successor(peers, anchor);
        if next.hash() == latest.hash() {
            return Ok(None);
        }

        info!(
            round,
            anchor,
            peers = next.len(),
            "peer set changed"
        );
        self.register_peer_set(next.clone())?;
        self.reset_rounds_from(anchor)?;
        Ok(Some(next))
    }

    /// Forget rounds `>= from` and queue their events for division again.
    fn reset_rounds_from(&mut self, from: u64) -> HashgraphResult<()> {
        let Some(last_round) = self.store.last_round()? else {
            return Ok(());
        };
        if last_round < from {
            return Ok(());
        }

        let mut requeue = Vec::new();
        for r in from..=last_round {
            if let Some(info) = self.store.get_round(r)? {
                requeue.extend(info.events);
            }
        }
        self.store.delete_rounds_from(from)?;

        let mut ordered = Vec::with_capacity(requeue.len() + self.pending_division.len());
        for hash in requeue.iter().chain(self.pending_division.iter()) {
            let mut meta = self.meta(hash)?;
            if meta.round.is_some() {
                meta.round = None;
                meta.witness = false;
                self.store.put_meta(hash, &meta)?;
            }
            ordered.push((meta.topological_index, *hash));
        }
        ordered.sort_unstable();
        ordered.dedup();

        let requeued: HashSet<EventHash> = requeue.iter().copied().collect();
        self.undetermined.retain(|h| !requeued.contains(h));
        self.pending_division = ordered.into_iter().map(|(_, h)| h).collect();
        debug!(from, requeued = requeue.len(), "rounds reset");
        Ok(())
    }

    // -- Frames ---------------------------------------------------------

    /// The frame stored for the block of `round`.
    pub fn get_frame(&self, round: u64) -> HashgraphResult<Frame> {
        self.store
            .get_frame(round)?
            .ok_or(HashgraphError::MissingFrame(round))
    }

    fn root_for(&self, hash: &EventHash) -> HashgraphResult<Root> {
        if let Some(root) = self.store.get_root(hash)? {
            return Ok(root);
        }
        let meta = self.meta(hash)?;
        Ok(Root {
            hash: *hash,
            creator_id: meta.creator_id,
            index: meta.index,
            round: meta.round.ok_or(HashgraphError::NotDivided(*hash))?,
            lamport: meta.lamport,
            last_ancestors: meta.last_ancestors,
        })
    }

    fn build_frame(&self, round: u64) -> HashgraphResult<Frame> {
        let start = round.saturating_sub(FRAME_DEPTH - 1);

        let mut events = Vec::new();
        let mut in_frame = HashSet::new();
        for r in start..=round {
            for hash in self.round_info(r)?.received_events {
                let meta = self.meta(&hash)?;
                let event = self
                    .store
                    .get_event(&hash)?
                    .ok_or(HashgraphError::MissingEvent(hash))?;
                let event_round = meta.round.ok_or(HashgraphError::NotDivided(hash))?;
                let fame = if meta.witness {
                    self.round_info(event_round)?
                        .witnesses
                        .get(&hash)
                        .copied()
                        .unwrap_or_default()
                } else {
                    Trilean::Undefined
                };
                in_frame.insert(hash);
                events.push((
                    meta.index,
                    FrameEvent {
                        event,
                        round: event_round,
                        lamport: meta.lamport,
                        witness: meta.witness,
                        fame,
                        round_received: r,
                    },
                ));
            }
        }

        let mut roots: BTreeMap<(PeerId, u64), Root> = BTreeMap::new();
        let mut first_in_frame: BTreeMap<PeerId, (u64, Option<EventHash>)> = BTreeMap::new();
        for (index, fe) in &events {
            if let Some(op) = fe.event.other_parent() {
                if !in_frame.contains(&op) {
                    let root = self.root_for(&op)?;
                    roots.insert((root.creator_id, root.index), root);
                }
            }
            let entry = first_in_frame
                .entry(fe.event.creator_id())
                .or_insert((*index, fe.event.self_parent()));
            if *index < entry.0 {
                *entry = (*index, fe.event.self_parent());
            }
        }
        for (creator, (_, self_parent)) in &first_in_frame {
            if let Some(sp) = self_parent {
                let root = self.root_for(sp)?;
                roots.insert((*creator, root.index), root);
            }
        }
        for (creator, (_, hash)) in &self.last_consensus_events {
            if !first_in_frame.contains_key(creator) {
                let root = self.root_for(hash)?;
                roots.insert((*creator, root.index), root);
            }
        }

        let mut events: Vec<FrameEvent> = events.into_iter().map(|(_, fe)| fe).collect();
        events.sort_by(|a, b| (a.lamport, a.event.hash()).cmp(&(b.lamport, b.event.hash())));

        // Famous witnesses of recent rounds that consensus has not received
        // yet. Which of them are famous is agreed; when each gets received
        // is not part of the frame.
        let mut famous = Vec::new();
        for r in round.saturating_sub(FRAME_DEPTH)..=round {
            let Some(info) = self.store.get_round(r)? else {
                continue;
            };
            for hash in info.famous_witnesses() {
                let received = self
                    .store
                    .get_meta(&hash)?
                    .and_then(|m| m.round_received)
                    .is_some_and(|rr| rr <= round);
                if !received {
                    famous.push(FrameWitness { round: r, hash });
                }
            }
        }
        famous.sort_unstable();

        Ok(Frame {
            round,
            peer_sets: self.peer_sets.values().cloned().collect(),
            roots: roots.into_values().collect(),
            events,
            famous,
        })
    }

    /// Throw away the DAG and continue from `block`, whose frame is `frame`.
    /// Used by fast-sync. `peer_sets` replaces the local peer-set history.
    pub fn reset(
        &mut self,
        block: Block,
        frame: Frame,
        peer_sets: Vec<PeerSet>,
    ) -> HashgraphResult<()> {
        if frame.round != block.round_received || frame.hash()? != block.frame_hash {
            return Err(HashgraphError::FrameMismatch(block.index));
        }
        if peer_sets.is_empty() {
            return Err(HashgraphError::NoPeerSet);
        }
        let round = frame.round;

        self.store.reset()?;
        self.peer_sets.clear();
        for ps in peer_sets {
            self.register_peer_set(ps)?;
        }
        self.pending_division.clear();
        self.undetermined.clear();
        self.last_consensus_events.clear();
        self.next_topological_index = 0;
        self.pending_loaded_events = 0;
        self.last_consensus_round = Some(round);
        self.horizon = round.saturating_sub(FRAME_DEPTH);
        self.last_block_index = Some(block.index);

        for root in &frame.roots {
            self.store.put_root(root)?;
            self.note_consensus_event(root.creator_id, root.index, root.hash);
        }

        let mut rounds: BTreeMap<u64, RoundInfo> = BTreeMap::new();
        for fe in &frame.events {
            let event = &fe.event;
            let hash = event.hash();
            if !event.verify() {
                return Err(InsertError::BadSignature(hash).into());
            }
            let creator = event.creator_id();

            let mut last_ancestors = BTreeMap::from([(creator, event.index())]);
            for parent in [event.self_parent(), event.other_parent()].into_iter().flatten() {
                let info = self
                    .parent_info(&parent)?
                    .ok_or(InsertError::UnknownParent(parent))?;
                for (p, idx) in info.last_ancestors {
                    let entry = last_ancestors.entry(p).or_insert(idx);
                    *entry = (*entry).max(idx);
                }
            }

            let meta = EventMeta {
                creator_id: creator,
                index: event.index(),
                self_parent: event.self_parent(),
                other_parent: event.other_parent(),
                topological_index: self.next_topological_index,
                lamport: fe.lamport,
                round: Some(fe.round),
                witness: fe.witness,
                last_ancestors,
                first_descendants: BTreeMap::from([(creator, event.index())]),
                round_received: Some(fe.round_received),
                consensus_timestamp: None,
                loaded: event.is_loaded(),
            };
            self.next_topological_index += 1;
            self.store.put_event(event, &meta)?;
            self.update_first_descendants(&meta)?;
            self.note_consensus_event(creator, event.index(), hash);

            rounds
                .entry(fe.round)
                .or_default()
                .add_event(hash, fe.witness, fe.fame);
            rounds
                .entry(fe.round_received)
                .or_default()
                .received_events
                .push(hash);
        }
        for fw in &frame.famous {
            rounds
                .entry(fw.round)
                .or_default()
                .witnesses
                .insert(fw.hash, Trilean::True);
        }
        for (r, mut info) in rounds {
            info.decided = true;
            self.store.put_round(r, &info)?;
        }

        self.store.put_block(&block)?;
        self.store.put_frame(&frame)?;
        info!(
            index = block.index,
            round,
            events = frame.events.len(),
            roots = frame.roots.len(),
            "reset from frame"
        );
        Ok(())
    }

    fn note_consensus_event(&mut self, creator: PeerId, index: u64, hash: EventHash) {
        let newer = self
            .last_consensus_events
            .get(&creator)
            .map_or(true, |(idx, _)| index > *idx);
        if newer {
            self.last_consensus_events.insert(creator, (index, hash));
        }
    }

    /// Insert previously persisted events, in order. Returns how many were
    /// accepted.
    pub fn bootstrap(&mut self, events: Vec<Event>) -> HashgraphResult<usize> {
        let total = events.len();
        let mut inserted = 0;
        for event in events {
            match self.insert_event(event) {
                Ok(_) => inserted += 1,
                Err(e) if e.is_validation() => warn!(error = %e, "skipping stored event"),
                Err(e) => return Err(e),
            }
        }
        info!(inserted, total, "bootstrapped hashgraph");
        Ok(inserted)
    }

    // -- Sync -----------------------------------------------------------

    /// Events we have that a peer with digest `known` lacks, in topological
    /// order and capped at `limit`. The flag is set when the peer cannot be
    /// brought up to date from these events alone: either more than `limit`
    /// are missing, or some are only known to us as roots.
    pub fn events_diff(
        &self,
        known: &BTreeMap<PeerId, u64>,
        limit: usize,
    ) -> HashgraphResult<(Vec<Event>, bool)> {
        let mut unavailable = false;
        let mut missing: Vec<(u64, Event)> = Vec::new();

        for (creator, last) in self.store.known_events()? {
            let start = match known.get(&creator).map(|k| k.checked_add(1)) {
                Some(Some(next)) => next,
                // The peer claims the whole chain.
                Some(None) => continue,
                None => 0,
            };
            // Only the lowest `limit + 1` per creator can make the cut.
            let mut taken = 0;
            for index in start..=last {
                if taken > limit {
                    break;
                }
                let Some(hash) = self.store.participant_event(creator, index)? else {
                    unavailable = true;
                    continue;
                };
                match (self.store.get_event(&hash)?, self.store.get_meta(&hash)?) {
                    (Some(event), Some(meta)) => {
                        missing.push((meta.topological_index, event));
                        taken += 1;
                    }
                    _ => unavailable = true,
                }
            }
        }

        missing.sort_by_key(|(topo, _)| *topo);
        let overflow = missing.len() > limit;
        missing.truncate(limit);
        Ok((
            missing.into_iter().map(|(_, e)| e).collect(),
            unavailable || overflow,
        ))
    }
}

/// `x` strongly sees `y` if a supermajority of `peer_set` have an event on
/// a path from `y` to `x`.
fn strongly_sees(x: &EventMeta, y: &EventMeta, peer_set: &PeerSet) -> bool {
    let count = peer_set
        .ids()
        .filter(|p| match (x.last_ancestors.get(p), y.first_descendants.get(p)) {
            (Some(la), Some(fd)) => la >= fd,
            _ => false,
        })
        .count();
    count >= peer_set.super_majority()
}
