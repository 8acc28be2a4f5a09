//! # Frames
//!
//! A frame is the slice of the hashgraph a node needs to continue consensus
//! from a block without replaying history. For block `R` it holds:
//!
//! - every event whose round-received lies in `(R - FRAME_DEPTH, R]`,
//!   together with the round, witness flag, fame, Lamport timestamp and
//!   round-received consensus assigned to it;
//! - a **root** for every event below that horizon that frame events point
//!   at, plus each creator's last event below the horizon. A root is just
//!   enough metadata (index, round, Lamport timestamp, ancestry vector) to
//!   stand in for the real event as a parent;
//! - every famous witness of rounds `[R - FRAME_DEPTH, R]` that is not
//!   itself in the frame. Those witnesses reach a fast-forwarded node after
//!   their round was decided, and their fame cannot be recomputed there;
//! - the peer-set history up to `R`.
//!
//! Everything in a frame is a function of consensus output, so every honest
//! node builds byte-identical frames and a block's `frame_hash` can be
//! checked by a node that fast-forwards from it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::event::{Event, EventHash};
use super::round::Trilean;
use super::HashgraphError;
use crate::peers::{PeerId, PeerSet};

/// Metadata standing in for an event below a frame's horizon.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    pub hash: EventHash,
    pub creator_id: PeerId,
    pub index: u64,
    pub round: u64,
    pub lamport: u64,
    pub last_ancestors: BTreeMap<PeerId, u64>,
}

/// A consensus event inside a frame, with the values consensus assigned it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameEvent {
    pub event: Event,
    pub round: u64,
    pub lamport: u64,
    pub witness: bool,
    /// `Undefined` for non-witnesses.
    pub fame: Trilean,
    pub round_received: u64,
}

/// A famous witness a frame vouches for without carrying it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameWitness {
    pub round: u64,
    pub hash: EventHash,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub round: u64,
    pub peer_sets: Vec<PeerSet>,
    /// Sorted by `(creator_id, index)`.
    pub roots: Vec<Root>,
    /// Sorted by `(lamport, hash)`, which is a topological order.
    pub events: Vec<FrameEvent>,
    /// Sorted by `(round, hash)`.
    pub famous: Vec<FrameWitness>,
}

impl Frame {
    /// BLAKE3 over the bincode encoding. Every collection in a frame is a
    /// sorted `Vec` or a `BTreeMap`, so the encoding is canonical.
    pub fn hash(&self) -> Result<[u8; 32], HashgraphError> {
        let bytes =
            bincode::serialize(self).map_err(|e| HashgraphError::Serialization(e.to_string()))?;
        Ok(*blake3::hash(&bytes).as_bytes())
    }
}
