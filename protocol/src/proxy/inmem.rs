//! [`AppProxy`] for an application running in the node's process.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use super::{AppProxy, CommitResponse, ProxyError, ProxyHandler, ProxyResult};
use crate::config::CHANNEL_CAPACITY;
use crate::hashgraph::Block;

pub struct InmemProxy<H> {
    handler: Arc<H>,
    submit_tx: mpsc::Sender<Vec<u8>>,
    submit_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
}

impl<H: ProxyHandler> InmemProxy<H> {
    pub fn new(handler: Arc<H>) -> Self {
        let (submit_tx, submit_rx) = mpsc::channel(CHANNEL_CAPACITY);
        Self {
            handler,
            submit_tx,
            submit_rx: Mutex::new(Some(submit_rx)),
        }
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Hand a transaction to the node.
    pub async fn submit_tx(&self, tx: Vec<u8>) -> ProxyResult<()> {
        self.submit_tx
            .send(tx)
            .await
            .map_err(|_| ProxyError::SubmitClosed)
    }

    /// A cloneable handle for submitting from elsewhere.
    pub fn submitter(&self) -> mpsc::Sender<Vec<u8>> {
        self.submit_tx.clone()
    }
}

#[async_trait]
impl<H: ProxyHandler + 'static> AppProxy for InmemProxy<H> {
    fn submit_receiver(&self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.submit_rx.lock().take()
    }

    async fn commit_block(&self, block: &Block) -> ProxyResult<CommitResponse> {
        let response = self.handler.commit_handler(block)?;
        debug!(
            index = block.index,
            state_hash = %hex::encode(response.state_hash),
            "committed block"
        );
        Ok(response)
    }

    async fn get_snapshot(&self, block_index: u64) -> ProxyResult<Vec<u8>> {
        let snapshot = self.handler.snapshot_handler(block_index)?;
        debug!(block_index, bytes = snapshot.len(), "served snapshot");
        Ok(snapshot)
    }

    async fn restore(&self, snapshot: &[u8]) -> ProxyResult<()> {
        self.handler.restore_handler(snapshot)?;
        debug!(bytes = snapshot.len(), "restored snapshot");
        Ok(())
    }
}
