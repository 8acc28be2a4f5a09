//! # Network
//!
//! Peer-to-peer RPC used by gossip:
//!
//! ```text
//! messages.rs   request/response types and the `Rpc` envelope
//! transport.rs  the `Transport` contract
//! inmem.rs      in-process transport for tests and simulations
//! tcp.rs        length-prefixed bincode over TCP
//! ```
//!
//! A transport only moves messages. Requests arrive on its consumer channel
//! and are answered by the node, which owns all consensus state.

pub mod inmem;
pub mod messages;
pub mod tcp;
pub mod transport;

pub use inmem::{InmemNetwork, InmemTransport};
pub use messages::{
    EagerSyncRequest, EagerSyncResponse, FastForwardRequest, FastForwardResponse, JoinRequest,
    JoinResponse, Rpc, RpcCommand, RpcReply, RpcResult, SyncRequest, SyncResponse,
};
pub use tcp::TcpTransport;
pub use transport::{Transport, TransportError, TransportResult};
