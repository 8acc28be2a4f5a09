//! Gossip RPC messages.
//!
//! ```text
//! Requester                               Responder
//! ─────────                               ─────────
//!   │  SyncRequest { known, limit }          │
//!   │──────────────────────────────────────► │
//!   │  SyncResponse { events, known, .. }    │
//!   │◄────────────────────────────────────── │
//!   │  EagerSyncRequest { events }           │   events the responder lacks,
//!   │──────────────────────────────────────► │   from its `known`
//!   │  EagerSyncResponse { success }         │
//!   │◄────────────────────────────────────── │
//! ```
//!
//! `known` is a digest: the last event index the sender holds for every
//! creator. FastForward and Join are one-shot request/response pairs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::oneshot;

use crate::hashgraph::{Block, Event, Frame, InternalTransaction};
use crate::peers::{Peer, PeerId, PeerSet};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub from_id: PeerId,
    pub known: BTreeMap<PeerId, u64>,
    pub sync_limit: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub from_id: PeerId,
    /// In topological order.
    pub events: Vec<Event>,
    /// The responder's own digest, so the requester can push back.
    pub known: BTreeMap<PeerId, u64>,
    /// The requester is too far behind to catch up from `events`.
    pub sync_limit_reached: bool,
    /// The responder's last decided round.
    pub last_consensus_round: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EagerSyncRequest {
    pub from_id: PeerId,
    pub events: Vec<Event>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EagerSyncResponse {
    pub from_id: PeerId,
    pub success: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FastForwardRequest {
    pub from_id: PeerId,
}

/// Everything needed to continue consensus from the responder's last
/// committed block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FastForwardResponse {
    pub from_id: PeerId,
    pub block: Block,
    pub frame: Frame,
    /// Application snapshot at `block`.
    pub snapshot: Vec<u8>,
    pub peer_sets: Vec<PeerSet>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    /// A `PeerAdd` signed by the joining node.
    pub internal_transaction: InternalTransaction,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinResponse {
    pub from_id: PeerId,
    pub accepted: bool,
    /// Round from which the joiner is a validator.
    pub accepted_round: u64,
    /// The peer set the joiner will belong to.
    pub peers: Vec<Peer>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcCommand {
    Sync(SyncRequest),
    EagerSync(EagerSyncRequest),
    FastForward(FastForwardRequest),
    Join(JoinRequest),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcReply {
    Sync(SyncResponse),
    EagerSync(EagerSyncResponse),
    FastForward(Box<FastForwardResponse>),
    Join(JoinResponse),
}

/// Responder side result: errors travel back as text.
pub type RpcResult = Result<RpcReply, String>;

/// An incoming request handed to the node, with the channel to answer on.
#[derive(Debug)]
pub struct Rpc {
    pub command: RpcCommand,
    pub respond_to: oneshot::Sender<RpcResult>,
}

impl Rpc {
    pub fn new(command: RpcCommand) -> (Self, oneshot::Receiver<RpcResult>) {
        let (respond_to, rx) = oneshot::channel();
        (
            Self {
                command,
                respond_to,
            },
            rx,
        )
    }

    /// Answer the request. The requester may have given up already, in
    /// which case the reply is dropped.
    pub fn respond(self, result: RpcResult) {
        let _ = self.respond_to.send(result);
    }
}
