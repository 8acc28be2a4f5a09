//! # Versioned Peer Sets
//!
//! A [`PeerSet`] is an immutable snapshot of the validator set. Each version
//! records the round at which it becomes active and the hash of the
//! version it replaced, so the history forms a chain:
//!
//! ```text
//!   genesis (round 0) ──► v1 (round 17, prev = H(genesis)) ──► v2 (round 42, prev = H(v1))
//! ```
//!
//! Versions are never edited. [`with_new_peer`](PeerSet::with_new_peer) and
//! [`with_removed_peer`](PeerSet::with_removed_peer) return a new version.

use serde::{Deserialize, Serialize};

use super::peer::{Peer, PeerId};
use crate::crypto::PublicKey;

/// An ordered, duplicate-free set of peers active from `round` onwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSet {
    peers: Vec<Peer>,
    round: u64,
    previous: Option<[u8; 32]>,
}

impl PeerSet {
    /// Build the genesis version from an arbitrary list of peers.
    ///
    /// Peers are sorted by id (then key) and de-duplicated by public key, so
    /// every node derives the same canonical order regardless of how the
    /// peers file was written.
    pub fn new(peers: Vec<Peer>) -> Self {
        Self {
            peers: canonical(peers),
            round: 0,
            previous: None,
        }
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn ids(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.peers.iter().map(Peer::id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Round at which this version becomes active.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// Hash of the version this one replaced. `None` for genesis.
    pub fn previous(&self) -> Option<[u8; 32]> {
        self.previous
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.peers.iter().any(|p| p.id() == id)
    }

    pub fn by_id(&self, id: PeerId) -> Option<&Peer> {
        self.peers.iter().find(|p| p.id() == id)
    }

    pub fn by_pub_key(&self, key: &PublicKey) -> Option<&Peer> {
        self.peers.iter().find(|p| &p.pub_key == key)
    }

    /// Smallest number of peers that is strictly more than two thirds of
    /// the set: `2n/3 + 1`.
    pub fn super_majority(&self) -> usize {
        2 * self.peers.len() / 3 + 1
    }

    /// BLAKE3 over the members' public keys in canonical order.
    ///
    /// The activation round is not part of the hash: two versions with the
    /// same members hash the same, which is what a block's `peers_hash`
    /// should express.
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        for peer in &self.peers {
            hasher.update(peer.pub_key.as_bytes());
        }
        *hasher.finalize().as_bytes()
    }

    /// A new version with `peer` added, active from `round`. Adding a peer
    /// that is already a member still produces a new version with the same
    /// members.
    pub fn with_new_peer(&self, peer: Peer, round: u64) -> Self {
        let mut peers = self.peers.clone();
        peers.push(peer);
        self.successor(peers, round)
    }

    /// A new version without the peer `id`, active from `round`.
    pub fn with_removed_peer(&self, id: PeerId, round: u64) -> Self {
        let peers = self.peers.iter().filter(|p| p.id() != id).cloned().collect();
        self.successor(peers, round)
    }

    /// Copy of this version re-anchored at `round`, keeping its members and
    /// predecessor.
    pub fn at_round(&self, round: u64) -> Self {
        Self {
            round,
            ..self.clone()
        }
    }

    /// A new version with exactly `peers`, active from `round`. Used to fold
    /// several membership changes into a single version.
    pub fn successor(&self, peers: Vec<Peer>, round: u64) -> Self {
        Self {
            peers: canonical(peers),
            round,
            previous: Some(self.hash()),
        }
    }
}

fn canonical(mut peers: Vec<Peer>) -> Vec<Peer> {
    peers.sort_by(|a, b| a.id().cmp(&b.id()).then_with(|| a.pub_key.cmp(&b.pub_key)));
    peers.dedup_by(|a, b| a.pub_key == b.pub_key);
    peers
}
