//! # Node
//!
//! A validator: the [`Core`] consensus state driven by the [`Node`] gossip
//! coordinator.
//!
//! ```text
//!            ┌──────────── Node task ────────────┐
//!  RPCs ───► │ select! { heartbeat, rpc, submit, │ ──► sync workers (≤ max_pool)
//!  submit ─► │   sync results, control }         │ ◄── results channel
//!            │          │                        │
//!            │          ▼                        │
//!            │   Core ─► Hashgraph ─► blocks ────┼──► AppProxy::commit_block
//!            └───────────────────────────────────┘
//! ```
//!
//! Only the node task touches the hashgraph. Sync workers do network I/O
//! and hand their results back through a channel. [`NodeHandle`] observes
//! the node from other tasks through a shared snapshot and the store.

pub mod core;
pub mod coordinator;
pub mod peer_selector;
pub mod state;
pub mod validator;

pub use self::core::Core;
pub use coordinator::{Node, NodeHandle, NodeStats};
pub use peer_selector::{PeerSelector, RandomPeerSelector};
pub use state::NodeState;
pub use validator::Validator;

use crate::hashgraph::{HashgraphError, StoreError};
use crate::net::TransportError;
use crate::proxy::ProxyError;

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("consensus error: {0}")]
    Hashgraph(#[from] HashgraphError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("application error: {0}")]
    Proxy(#[from] ProxyError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("transport consumer already taken")]
    ConsumerTaken,

    #[error("join request refused")]
    JoinRefused,

    #[error("leave not committed in time")]
    LeaveTimeout,

    #[error("node is shut down")]
    Shutdown,
}

pub type NodeResult<T> = Result<T, NodeError>;
