//! # Core
//!
//! The synchronous half of a node: the hashgraph plus the pools of
//! transactions waiting to be wrapped in our next event. Everything here
//! runs inside the node's single consensus task; nothing is shared.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::validator::Validator;
use super::NodeResult;
use crate::hashgraph::{
    Block, Event, EventHash, Frame, Hashgraph, HashgraphConfig, InsertError, HashgraphError,
    InternalTransaction, Store,
};
use crate::peers::{PeerId, PeerSet};
use crate::proxy::CommitResponse;

pub struct Core {
    validator: Validator,
    hashgraph: Hashgraph,
    transaction_pool: Vec<Vec<u8>>,
    internal_transaction_pool: Vec<InternalTransaction>,
}

impl Core {
    pub fn new(
        validator: Validator,
        store: Arc<dyn Store>,
        genesis: PeerSet,
        config: HashgraphConfig,
    ) -> NodeResult<Self> {
        Ok(Self {
            validator,
            hashgraph: Hashgraph::new(store, genesis, config)?,
            transaction_pool: Vec::new(),
            internal_transaction_pool: Vec::new(),
        })
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn id(&self) -> PeerId {
        self.validator.id()
    }

    pub fn hashgraph(&self) -> &Hashgraph {
        &self.hashgraph
    }

    pub fn transaction_pool_len(&self) -> usize {
        self.transaction_pool.len()
    }

    pub fn internal_transaction_pool_len(&self) -> usize {
        self.internal_transaction_pool.len()
    }

    pub fn add_transactions(&mut self, txs: impl IntoIterator<Item = Vec<u8>>) {
        self.transaction_pool.extend(txs);
    }

    pub fn add_internal_transaction(&mut self, itx: InternalTransaction) {
        self.internal_transaction_pool.push(itx);
    }

    /// Whether there is anything waiting to reach consensus. Drives the
    /// fast heartbeat.
    pub fn busy(&self) -> bool {
        !self.transaction_pool.is_empty()
            || !self.internal_transaction_pool.is_empty()
            || self.hashgraph.pending_loaded_events() > 0
    }

    /// Whether we may create events: we are in the newest peer set.
    pub fn is_validator(&self) -> NodeResult<bool> {
        Ok(self.hashgraph.latest_peer_set()?.contains(self.id()))
    }

    /// We are the only validator, so events need no other-parent.
    pub fn is_alone(&self) -> NodeResult<bool> {
        let latest = self.hashgraph.latest_peer_set()?;
        Ok(latest.len() == 1 && latest.contains(self.id()))
    }

    pub fn known_events(&self) -> NodeResult<BTreeMap<PeerId, u64>> {
        Ok(self.hashgraph.known_events()?)
    }

    pub fn events_diff(
        &self,
        known: &BTreeMap<PeerId, u64>,
        limit: usize,
    ) -> NodeResult<(Vec<Event>, bool)> {
        Ok(self.hashgraph.events_diff(known, limit)?)
    }

    /// Insert events received from `from`, then record the sync with a new
    /// event of ours whose other-parent is the newest one received.
    ///
    /// Invalid events are logged and skipped. Returns how many were
    /// inserted.
    pub fn sync(&mut self, from: PeerId, events: Vec<Event>) -> NodeResult<usize> {
        let total = events.len();
        let mut other_head = None;
        let mut inserted = 0;
        for event in events {
            match self.hashgraph.insert_event(event) {
                Ok(hash) => {
                    other_head = Some(hash);
                    inserted += 1;
                }
                Err(HashgraphError::Insert(InsertError::Duplicate(hash))) => {
                    trace!(event = %hash.short(), "already have event");
                }
                Err(e) if e.is_validation() => {
                    warn!(from, error = %e, "rejected event");
                }
                Err(e) => return Err(e.into()),
            }
        }
        debug!(from, inserted, total, "synced events");

        if let Some(head) = other_head {
            if self.is_validator()? {
                self.create_self_event(Some(head))?;
            }
        }
        Ok(inserted)
    }

    /// Wrap both pools into our next event and insert it. Returns `None`
    /// when the event could not be added, in which case the pools are left
    /// untouched.
    pub fn create_self_event(
        &mut self,
        other_parent: Option<EventHash>,
    ) -> NodeResult<Option<EventHash>> {
        let last = self.hashgraph.last_event_from(self.id())?;
        let mut event = Event::new(
            std::mem::take(&mut self.transaction_pool),
            std::mem::take(&mut self.internal_transaction_pool),
            last.map(|(h, _)| h),
            other_parent,
            self.validator.public_key(),
            last.map_or(0, |(_, i)| i + 1),
        );
        event.sign(self.validator.keypair());

        match self.hashgraph.insert_event(event.clone()) {
            Ok(hash) => {
                debug!(
                    event = %hash.short(),
                    index = event.index(),
                    transactions = event.transactions().len(),
                    "created event"
                );
                Ok(Some(hash))
            }
            Err(e) if e.is_validation() => {
                warn!(error = %e, "could not add self event");
                self.transaction_pool = event.body.transactions;
                self.internal_transaction_pool = event.body.internal_transactions;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn run_consensus(&mut self) -> NodeResult<()> {
        Ok(self.hashgraph.run_consensus()?)
    }

    /// The next block awaiting commit, if a round has been decided.
    pub fn next_block(&mut self) -> NodeResult<Option<Block>> {
        Ok(self.hashgraph.create_next_block()?)
    }

    /// Record the application's response to `block`. Membership changes it
    /// accepted are applied and consensus resumes where it stopped.
    pub fn commit(&mut self, block: Block, response: CommitResponse) -> NodeResult<Block> {
        let block = self.hashgraph.apply_commit(
            block,
            response.state_hash,
            response.internal_transaction_receipts,
        )?;
        self.hashgraph.run_consensus()?;
        Ok(block)
    }

    /// The last committed block, its frame and the peer-set history: what a
    /// peer needs to fast-forward to us.
    pub fn anchor(&self) -> NodeResult<Option<(Block, Frame, Vec<PeerSet>)>> {
        let Some(index) = self.hashgraph.last_block_index() else {
            return Ok(None);
        };
        let Some(block) = self.hashgraph.store().get_block(index)? else {
            return Ok(None);
        };
        let frame = self.hashgraph.get_frame(block.round_received)?;
        let peer_sets = self.hashgraph.peer_sets().values().cloned().collect();
        Ok(Some((block, frame, peer_sets)))
    }

    /// Restart consensus from a peer's block and frame.
    pub fn fast_forward(
        &mut self,
        block: Block,
        frame: Frame,
        peer_sets: Vec<PeerSet>,
    ) -> NodeResult<()> {
        self.hashgraph.reset(block, frame, peer_sets)?;
        Ok(())
    }

    /// Replay events loaded from a persistent store.
    pub fn bootstrap(&mut self, events: Vec<Event>) -> NodeResult<usize> {
        let inserted = self.hashgraph.bootstrap(events)?;
        self.hashgraph.run_consensus()?;
        Ok(inserted)
    }
}
