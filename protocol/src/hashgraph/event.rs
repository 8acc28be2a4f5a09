//! # Events
//!
//! An event is a signed vertex of the hashgraph. It carries a batch of
//! application transactions and membership transactions, and points at up
//! to two parents:
//!
//! ```text
//!            e_A2          e_B1
//!   self ─►   │  ◄── other ─┘
//!            e_A1
//! ```
//!
//! - the **self-parent** is the creator's previous event (absent only for
//!   the creator's first event);
//! - the **other-parent** is the latest event the creator learned from
//!   someone else during gossip.
//!
//! Identity is the BLAKE3 hash of the body. The signature covers that hash.
//! Everything consensus derives about an event (round, witness flag,
//! round-received, ancestry vectors) lives in [`EventMeta`], keyed by hash,
//! never inside the event itself.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::internal_tx::InternalTransaction;
use crate::crypto::{Keypair, PublicKey, Signature};
use crate::peers::{peer_id, PeerId};

/// Content hash of an event body.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct EventHash(pub [u8; 32]);

impl EventHash {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First eight hex characters, enough to tell events apart in logs.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for EventHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for EventHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventHash({})", self.short())
    }
}

/// The signed part of an event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBody {
    pub transactions: Vec<Vec<u8>>,
    pub internal_transactions: Vec<InternalTransaction>,
    pub self_parent: Option<EventHash>,
    pub other_parent: Option<EventHash>,
    pub creator: PublicKey,
    /// Position in the creator's self-parent chain, starting at 0.
    pub index: u64,
    /// Wall-clock creation time in unix milliseconds. Informational only;
    /// consensus ordering never looks at it.
    pub timestamp: i64,
}

impl EventBody {
    /// Canonical hash of the body.
    ///
    /// Fields are fed to BLAKE3 with explicit length prefixes so that no two
    /// different bodies can produce the same preimage.
    pub fn hash(&self) -> EventHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(self.transactions.len() as u64).to_le_bytes());
        for tx in &self.transactions {
            hasher.update(&(tx.len() as u64).to_le_bytes());
            hasher.update(tx);
        }
        hasher.update(&(self.internal_transactions.len() as u64).to_le_bytes());
        for itx in &self.internal_transactions {
            hasher.update(&itx.hash());
            hasher.update(itx.signature.as_bytes());
        }
        for parent in [&self.self_parent, &self.other_parent] {
            match parent {
                Some(h) => {
                    hasher.update(&[1]);
                    hasher.update(&h.0);
                }
                None => {
                    hasher.update(&[0]);
                }
            }
        }
        hasher.update(self.creator.as_bytes());
        hasher.update(&self.index.to_le_bytes());
        hasher.update(&self.timestamp.to_le_bytes());
        EventHash(*hasher.finalize().as_bytes())
    }
}

/// A signed event as it travels between nodes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub body: EventBody,
    pub signature: Signature,
}

impl Event {
    /// Build an unsigned event stamped with the current time.
    pub fn new(
        transactions: Vec<Vec<u8>>,
        internal_transactions: Vec<InternalTransaction>,
        self_parent: Option<EventHash>,
        other_parent: Option<EventHash>,
        creator: PublicKey,
        index: u64,
    ) -> Self {
        Self {
            body: EventBody {
                transactions,
                internal_transactions,
                self_parent,
                other_parent,
                creator,
                index,
                timestamp: chrono::Utc::now().timestamp_millis(),
            },
            signature: Signature::default(),
        }
    }

    /// Sign the body hash with the creator's key.
    pub fn sign(&mut self, keypair: &Keypair) {
        self.signature = keypair.sign(&self.hash().0);
    }

    /// Check the creator's signature and every internal transaction's
    /// signature.
    pub fn verify(&self) -> bool {
        self.body.creator.verify(&self.hash().0, &self.signature)
            && self.body.internal_transactions.iter().all(|itx| itx.verify())
    }

    pub fn hash(&self) -> EventHash {
        self.body.hash()
    }

    pub fn creator_id(&self) -> PeerId {
        peer_id(&self.body.creator)
    }

    pub fn index(&self) -> u64 {
        self.body.index
    }

    pub fn self_parent(&self) -> Option<EventHash> {
        self.body.self_parent
    }

    pub fn other_parent(&self) -> Option<EventHash> {
        self.body.other_parent
    }

    pub fn transactions(&self) -> &[Vec<u8>] {
        &self.body.transactions
    }

    pub fn internal_transactions(&self) -> &[InternalTransaction] {
        &self.body.internal_transactions
    }

    /// Whether the event carries any payload worth reaching consensus on.
    pub fn is_loaded(&self) -> bool {
        !self.body.transactions.is_empty() || !self.body.internal_transactions.is_empty()
    }
}

/// Everything the consensus algorithm derives about an event.
///
/// `last_ancestors[p]` is the highest index of `p`'s events that this event
/// can reach (itself included). `first_descendants[p]` is the lowest index
/// of `p`'s events that can reach this event. With both vectors, "x sees y"
/// and "x strongly sees y" are map lookups instead of graph walks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    pub creator_id: PeerId,
    pub index: u64,
    pub self_parent: Option<EventHash>,
    pub other_parent: Option<EventHash>,
    /// Insertion position in this node's store. Parents always come first.
    pub topological_index: u64,
    pub lamport: u64,
    pub round: Option<u64>,
    pub witness: bool,
    pub last_ancestors: BTreeMap<PeerId, u64>,
    pub first_descendants: BTreeMap<PeerId, u64>,
    pub round_received: Option<u64>,
    /// Median Lamport timestamp assigned by the famous witnesses of the
    /// round-received.
    pub consensus_timestamp: Option<u64>,
    pub loaded: bool,
}

impl EventMeta {
    /// Whether the event described by `self` has the event
    /// `(creator, index)` among its ancestors.
    pub fn sees(&self, creator: PeerId, index: u64) -> bool {
        self.last_ancestors
            .get(&creator)
            .is_some_and(|&last| last >= index)
    }
}
