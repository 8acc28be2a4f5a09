//! The transport contract.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

use super::messages::{
    EagerSyncRequest, EagerSyncResponse, FastForwardRequest, FastForwardResponse, JoinRequest,
    JoinResponse, Rpc, RpcCommand, RpcReply, SyncRequest, SyncResponse,
};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request to {0} timed out")]
    Timeout(String),

    #[error("peer {0} unreachable")]
    Unreachable(String),

    #[error("transport closed")]
    Closed,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("unexpected reply")]
    UnexpectedReply,
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Point-to-point RPC between peers, addressed by `net_addr`.
///
/// Incoming requests are delivered as [`Rpc`]s on the consumer channel; the
/// node answers through each request's oneshot. Every outgoing request is
/// bounded by a timeout: `timeout()` for gossip, `join_timeout()` for joins
/// and fast-forwards.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Address peers reach this transport at.
    fn local_addr(&self) -> String;

    fn timeout(&self) -> Duration;

    fn join_timeout(&self) -> Duration;

    async fn request(
        &self,
        target: &str,
        command: RpcCommand,
        timeout: Duration,
    ) -> TransportResult<RpcReply>;

    /// Incoming requests. Can be taken only once.
    fn take_consumer(&self) -> Option<mpsc::Receiver<Rpc>>;

    /// Stop accepting requests. Outgoing requests fail afterwards.
    async fn close(&self);

    async fn sync(&self, target: &str, request: SyncRequest) -> TransportResult<SyncResponse> {
        match self
            .request(target, RpcCommand::Sync(request), self.timeout())
            .await?
        {
            RpcReply::Sync(r) => Ok(r),
            _ => Err(TransportError::UnexpectedReply),
        }
    }

    async fn eager_sync(
        &self,
        target: &str,
        request: EagerSyncRequest,
    ) -> TransportResult<EagerSyncResponse> {
        match self
            .request(target, RpcCommand::EagerSync(request), self.timeout())
            .await?
        {
            RpcReply::EagerSync(r) => Ok(r),
            _ => Err(TransportError::UnexpectedReply),
        }
    }

    async fn fast_forward(
        &self,
        target: &str,
        request: FastForwardRequest,
    ) -> TransportResult<FastForwardResponse> {
        match self
            .request(target, RpcCommand::FastForward(request), self.join_timeout())
            .await?
        {
            RpcReply::FastForward(r) => Ok(*r),
            _ => Err(TransportError::UnexpectedReply),
        }
    }

    async fn join(&self, target: &str, request: JoinRequest) -> TransportResult<JoinResponse> {
        match self
            .request(target, RpcCommand::Join(request), self.join_timeout())
            .await?
        {
            RpcReply::Join(r) => Ok(r),
            _ => Err(TransportError::UnexpectedReply),
        }
    }
}
