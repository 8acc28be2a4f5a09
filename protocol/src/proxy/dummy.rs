//! A toy application for tests and demos.
//!
//! The state is a running hash: each committed transaction `tx` moves it to
//! `H(state || sha256(tx))`. Every membership request is accepted. The
//! snapshot of block `n` is the state hash after committing it; only the
//! most recent [`SNAPSHOT_HISTORY`] are kept.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::info;

use super::{CommitResponse, ProxyError, ProxyHandler, ProxyResult};
use crate::crypto::{sha256, simple_hash_from_two_hashes};
use crate::hashgraph::Block;

/// Snapshots a [`DummyState`] keeps by default.
pub const SNAPSHOT_HISTORY: usize = 128;

#[derive(Default)]
struct Inner {
    state_hash: [u8; 32],
    snapshots: BTreeMap<u64, [u8; 32]>,
    committed: Vec<Vec<u8>>,
}

pub struct DummyState {
    inner: Mutex<Inner>,
    snapshot_history: usize,
}

impl Default for DummyState {
    fn default() -> Self {
        Self::with_snapshot_history(SNAPSHOT_HISTORY)
    }
}

impl DummyState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep snapshots of the last `history` blocks only (at least one).
    pub fn with_snapshot_history(history: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            snapshot_history: history.max(1),
        }
    }

    pub fn state_hash(&self) -> [u8; 32] {
        self.inner.lock().state_hash
    }

    /// Every transaction committed so far, in order.
    pub fn committed_transactions(&self) -> Vec<Vec<u8>> {
        self.inner.lock().committed.clone()
    }
}

impl ProxyHandler for DummyState {
    fn commit_handler(&self, block: &Block) -> ProxyResult<CommitResponse> {
        let mut inner = self.inner.lock();
        for tx in &block.transactions {
            inner.state_hash = simple_hash_from_two_hashes(&inner.state_hash, &sha256(tx));
            inner.committed.push(tx.clone());
        }
        let state_hash = inner.state_hash;
        inner.snapshots.insert(block.index, state_hash);
        while inner.snapshots.len() > self.snapshot_history {
            inner.snapshots.pop_first();
        }

        Ok(CommitResponse {
            state_hash,
            internal_transaction_receipts: block
                .internal_transactions
                .iter()
                .map(|itx| itx.as_accepted())
                .collect(),
        })
    }

    fn snapshot_handler(&self, block_index: u64) -> ProxyResult<Vec<u8>> {
        self.inner
            .lock()
            .snapshots
            .get(&block_index)
            .map(|h| h.to_vec())
            .ok_or(ProxyError::Snapshot(block_index))
    }

    fn restore_handler(&self, snapshot: &[u8]) -> ProxyResult<()> {
        let state_hash: [u8; 32] = snapshot
            .try_into()
            .map_err(|_| ProxyError::Restore(format!("expected 32 bytes, got {}", snapshot.len())))?;
        let mut inner = self.inner.lock();
        inner.state_hash = state_hash;
        inner.committed.clear();
        info!(state_hash = %hex::encode(state_hash), "dummy state restored");
        Ok(())
    }
}

/// Submits transactions to a node on behalf of a client.
#[derive(Clone)]
pub struct DummyClient {
    submit: mpsc::Sender<Vec<u8>>,
}

impl DummyClient {
    pub fn new(submit: mpsc::Sender<Vec<u8>>) -> Self {
        Self { submit }
    }

    pub async fn submit_tx(&self, tx: impl Into<Vec<u8>>) -> ProxyResult<()> {
        self.submit
            .send(tx.into())
            .await
            .map_err(|_| ProxyError::SubmitClosed)
    }
}
