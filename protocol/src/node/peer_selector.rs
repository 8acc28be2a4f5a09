//! Choosing whom to gossip with next.

use rand::seq::SliceRandom;

use crate::peers::{Peer, PeerId};

pub trait PeerSelector: Send {
    /// The next sync target among `peers`, or `None` if there is nobody
    /// but ourselves.
    fn next(&mut self, peers: &[Peer]) -> Option<Peer>;
}

/// Uniformly random, never ourselves, and never the previous target twice
/// in a row unless it is the only choice.
pub struct RandomPeerSelector {
    self_id: PeerId,
    last: Option<PeerId>,
}

impl RandomPeerSelector {
    pub fn new(self_id: PeerId) -> Self {
        Self {
            self_id,
            last: None,
        }
    }
}

impl PeerSelector for RandomPeerSelector {
    fn next(&mut self, peers: &[Peer]) -> Option<Peer> {
        let others: Vec<&Peer> = peers.iter().filter(|p| p.id() != self.self_id).collect();
        let fresh: Vec<&Peer> = others
            .iter()
            .copied()
            .filter(|p| Some(p.id()) != self.last)
            .collect();
        let candidates = if fresh.is_empty() { others } else { fresh };

        let choice = candidates.choose(&mut rand::thread_rng()).map(|p| (*p).clone());
        if let Some(p) = &choice {
            self.last = Some(p.id());
        }
        choice
    }
}
