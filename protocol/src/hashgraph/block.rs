//! # Blocks
//!
//! One block per round-received that has at least one consensus event.
//! The block lists the transactions of those events in consensus order and
//! commits to the rest of the consensus state through three hashes:
//!
//! | Field        | Commits to                                         |
//! |--------------|----------------------------------------------------|
//! | `frame_hash` | the [`Frame`](super::Frame) of the round            |
//! | `peers_hash` | the peer set active at the round                    |
//! | `state_hash` | the application state after applying the block      |
//!
//! `state_hash` and the receipts are zero/empty while the block is pending
//! and are filled in from the application's commit response.

use serde::{Deserialize, Serialize};

use super::internal_tx::{InternalTransaction, InternalTransactionReceipt};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub round_received: u64,
    pub state_hash: [u8; 32],
    pub frame_hash: [u8; 32],
    pub peers_hash: [u8; 32],
    pub transactions: Vec<Vec<u8>>,
    pub internal_transactions: Vec<InternalTransaction>,
    pub internal_transaction_receipts: Vec<InternalTransactionReceipt>,
}

impl Block {
    /// A pending block, not yet committed by the application.
    pub fn new(
        index: u64,
        round_received: u64,
        frame_hash: [u8; 32],
        peers_hash: [u8; 32],
        transactions: Vec<Vec<u8>>,
        internal_transactions: Vec<InternalTransaction>,
    ) -> Self {
        Self {
            index,
            round_received,
            state_hash: [0u8; 32],
            frame_hash,
            peers_hash,
            transactions,
            internal_transactions,
            internal_transaction_receipts: Vec::new(),
        }
    }

    /// BLAKE3 over every field, in declaration order.
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.index.to_le_bytes());
        hasher.update(&self.round_received.to_le_bytes());
        hasher.update(&self.state_hash);
        hasher.update(&self.frame_hash);
        hasher.update(&self.peers_hash);
        hasher.update(&(self.transactions.len() as u64).to_le_bytes());
        for tx in &self.transactions {
            hasher.update(&(tx.len() as u64).to_le_bytes());
            hasher.update(tx);
        }
        for itx in &self.internal_transactions {
            hasher.update(&itx.hash());
        }
        for receipt in &self.internal_transaction_receipts {
            hasher.update(&receipt.internal_transaction.hash());
            hasher.update(&[receipt.accepted as u8]);
        }
        *hasher.finalize().as_bytes()
    }
}
