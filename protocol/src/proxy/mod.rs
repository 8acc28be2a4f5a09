//! # Application Proxy
//!
//! The boundary between consensus and the replicated application.
//!
//! ```text
//!   app ── submit ──► submit channel ──► node (pending pool)
//!   app ◄── commit_block(block) ─────── node
//!   app ── CommitResponse ─────────────► node (state hash + receipts)
//!   app ◄── get_snapshot / restore ───── node (fast-sync)
//! ```
//!
//! The node calls [`AppProxy::commit_block`] once per block, in index
//! order, and never issues the next commit before the previous one has
//! returned successfully.
//!
//! Two implementations: [`InmemProxy`] for an application linked into the
//! node process, and [`SocketAppProxy`] for one running elsewhere and
//! talking to the node over TCP through a [`SocketNodeProxy`].

pub mod dummy;
pub mod inmem;
pub mod socket;

pub use dummy::{DummyClient, DummyState};
pub use inmem::InmemProxy;
pub use socket::{SocketAppProxy, SocketNodeProxy};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::hashgraph::{Block, InternalTransactionReceipt};

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("commit failed: {0}")]
    Commit(String),

    #[error("no snapshot for block {0}")]
    Snapshot(u64),

    #[error("restore failed: {0}")]
    Restore(String),

    #[error("submit channel closed")]
    SubmitClosed,

    #[error("socket error: {0}")]
    Socket(String),

    #[error("remote error: {0}")]
    Remote(String),
}

pub type ProxyResult<T> = Result<T, ProxyError>;

/// What the application returns for a committed block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResponse {
    pub state_hash: [u8; 32],
    /// One receipt per internal transaction of the block.
    pub internal_transaction_receipts: Vec<InternalTransactionReceipt>,
}

#[async_trait]
pub trait AppProxy: Send + Sync {
    /// Stream of raw transactions submitted by the application. Can be
    /// taken only once; later calls return `None`.
    fn submit_receiver(&self) -> Option<mpsc::Receiver<Vec<u8>>>;

    async fn commit_block(&self, block: &Block) -> ProxyResult<CommitResponse>;

    async fn get_snapshot(&self, block_index: u64) -> ProxyResult<Vec<u8>>;

    async fn restore(&self, snapshot: &[u8]) -> ProxyResult<()>;
}

/// Synchronous application callbacks, for apps that live in the same
/// process as the node (see [`InmemProxy`]).
pub trait ProxyHandler: Send + Sync {
    fn commit_handler(&self, block: &Block) -> ProxyResult<CommitResponse>;

    fn snapshot_handler(&self, block_index: u64) -> ProxyResult<Vec<u8>>;

    fn restore_handler(&self, snapshot: &[u8]) -> ProxyResult<()>;
}
