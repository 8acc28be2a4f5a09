//! # TCP Transport
//!
//! One request and one reply per exchange, each sent as a frame:
//!
//! ```text
//! ┌───────────────┬──────────────────────────────┐
//! │ length (u32BE)│ bincode payload              │
//! └───────────────┴──────────────────────────────┘
//! ```
//!
//! Requests are `RpcCommand`s, replies are `Result<RpcReply, String>`.
//! Frames above [`MAX_FRAME_BYTES`] are refused in both directions.
//!
//! Outgoing connections are reused: after a successful exchange the stream
//! goes back into a per-target pool holding at most `max_pool` idle
//! connections. A stream that failed is dropped.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace};

use super::messages::{Rpc, RpcCommand, RpcReply, RpcResult};
use super::transport::{Transport, TransportError, TransportResult};
use crate::config::{CHANNEL_CAPACITY, MAX_FRAME_BYTES};

/// Write `value` as one length-prefixed frame. Shared with the socket
/// application proxy.
pub(crate) async fn write_frame<W, T>(stream: &mut W, value: &T) -> TransportResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload =
        bincode::serialize(value).map_err(|e| TransportError::Serialization(e.to_string()))?;
    if payload.len() > MAX_FRAME_BYTES {
        return Err(TransportError::FrameTooLarge(payload.len()));
    }
    stream.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    stream.write_all(&payload).await?;
    stream.flush().await?;
    Ok(())
}

pub(crate) async fn read_frame<R, T>(stream: &mut R) -> TransportResult<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(TransportError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    bincode::deserialize(&payload).map_err(|e| TransportError::Serialization(e.to_string()))
}

pub struct TcpTransport {
    local_addr: String,
    pool: DashMap<String, Vec<TcpStream>>,
    max_pool: usize,
    timeout: Duration,
    join_timeout: Duration,
    consumer: Mutex<Option<mpsc::Receiver<Rpc>>>,
    shutdown: watch::Sender<bool>,
}

impl TcpTransport {
    /// Listen on `bind_addr` and start serving requests.
    ///
    /// `advertise_addr` is what peers are told to dial; when `None` the
    /// bound address is used.
    pub async fn bind(
        bind_addr: &str,
        advertise_addr: Option<String>,
        max_pool: usize,
        timeout: Duration,
        join_timeout: Duration,
    ) -> TransportResult<Arc<Self>> {
        let listener = TcpListener::bind(bind_addr).await?;
        let local_addr = advertise_addr.unwrap_or(listener.local_addr()?.to_string());
        let (consumer_tx, consumer_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (shutdown, shutdown_rx) = watch::channel(false);

        info!(addr = %local_addr, "tcp transport listening");
        tokio::spawn(accept_loop(listener, consumer_tx, shutdown_rx));

        Ok(Arc::new(Self {
            local_addr,
            pool: DashMap::new(),
            max_pool: max_pool.max(1),
            timeout,
            join_timeout,
            consumer: Mutex::new(Some(consumer_rx)),
            shutdown,
        }))
    }

    async fn connection(&self, target: &str) -> TransportResult<TcpStream> {
        let pooled = self.pool.get_mut(target).and_then(|mut idle| idle.pop());
        match pooled {
            Some(stream) => Ok(stream),
            None => TcpStream::connect(target)
                .await
                .map_err(|_| TransportError::Unreachable(target.to_string())),
        }
    }

    fn release(&self, target: &str, stream: TcpStream) {
        let mut idle = self.pool.entry(target.to_string()).or_default();
        if idle.len() < self.max_pool {
            idle.push(stream);
        }
    }

    async fn exchange(&self, target: &str, command: &RpcCommand) -> TransportResult<RpcReply> {
        let mut stream = self.connection(target).await?;
        write_frame(&mut stream, command).await?;
        let result: RpcResult = read_frame(&mut stream).await?;
        self.release(target, stream);
        result.map_err(TransportError::Remote)
    }
}

async fn accept_loop(
    listener: TcpListener,
    consumer: mpsc::Sender<Rpc>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("tcp accept loop stopping");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    trace!(%remote, "accepted connection");
                    tokio::spawn(serve_connection(stream, consumer.clone(), shutdown.clone()));
                }
                Err(e) => debug!(error = %e, "accept failed"),
            }
        }
    }
}

/// Answer requests on one connection until the peer hangs up.
async fn serve_connection(
    mut stream: TcpStream,
    consumer: mpsc::Sender<Rpc>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let command: RpcCommand = tokio::select! {
            _ = shutdown.changed() => return,
            read = read_frame(&mut stream) => match read {
                Ok(c) => c,
                Err(_) => return,
            }
        };
        let (rpc, reply) = Rpc::new(command);
        if consumer.send(rpc).await.is_err() {
            return;
        }
        let result = reply
            .await
            .unwrap_or_else(|_| Err("request dropped by node".to_string()));
        if let Err(e) = write_frame(&mut stream, &result).await {
            debug!(error = %e, "failed to write reply");
            return;
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn local_addr(&self) -> String {
        self.local_addr.clone()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn join_timeout(&self) -> Duration {
        self.join_timeout
    }

    async fn request(
        &self,
        target: &str,
        command: RpcCommand,
        timeout: Duration,
    ) -> TransportResult<RpcReply> {
        if *self.shutdown.borrow() {
            return Err(TransportError::Closed);
        }
        tokio::time::timeout(timeout, self.exchange(target, &command))
            .await
            .map_err(|_| TransportError::Timeout(target.to_string()))?
    }

    fn take_consumer(&self) -> Option<mpsc::Receiver<Rpc>> {
        self.consumer.lock().take()
    }

    async fn close(&self) {
        let _ = self.shutdown.send(true);
        self.pool.clear();
        info!(addr = %self.local_addr, "tcp transport closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::messages::{FastForwardRequest, SyncRequest, SyncResponse};
    use std::collections::BTreeMap;

    async fn transport() -> Arc<TcpTransport> {
        TcpTransport::bind(
            "127.0.0.1:0",
            None,
            2,
            Duration::from_secs(2),
            Duration::from_secs(2),
        )
        .await
        .unwrap()
    }

    /// Answer every sync with an empty response naming `id`.
    fn serve_sync(t: &TcpTransport, id: u32) {
        let mut consumer = t.take_consumer().unwrap();
        tokio::spawn(async move {
            while let Some(rpc) = consumer.recv().await {
                let reply = match &rpc.command {
                    RpcCommand::Sync(req) => Ok(RpcReply::Sync(SyncResponse {
                        from_id: id,
                        events: vec![],
                        known: req.known.clone(),
                        sync_limit_reached: false,
                        last_consensus_round: None,
                    })),
                    _ => Err("unsupported".to_string()),
                };
                rpc.respond(reply);
            }
        });
    }

    #[tokio::test]
    async fn sync_over_tcp_reuses_connections() {
        let server = transport().await;
        let client = transport().await;
        serve_sync(&server, 7);

        let target = server.local_addr();
        for i in 0..3u64 {
            let known = BTreeMap::from([(1, i)]);
            let resp = client
                .sync(&target, SyncRequest { from_id: 1, known: known.clone(), sync_limit: 5 })
                .await
                .unwrap();
            assert_eq!(resp.from_id, 7);
            assert_eq!(resp.known, known);
        }
        assert_eq!(client.pool.get(&target).map(|p| p.len()), Some(1));
    }

    #[tokio::test]
    async fn remote_errors_are_reported() {
        let server = transport().await;
        let client = transport().await;
        serve_sync(&server, 7);

        let err = client
            .request(
                &server.local_addr(),
                RpcCommand::FastForward(FastForwardRequest { from_id: 1 }),
                Duration::from_secs(2),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Remote(msg) if msg == "unsupported"));
    }

    #[tokio::test]
    async fn closed_transport_refuses_requests() {
        let client = transport().await;
        client.close().await;
        let err = client
            .request(
                "127.0.0.1:1",
                RpcCommand::Sync(SyncRequest {
                    from_id: 1,
                    known: BTreeMap::new(),
                    sync_limit: 1,
                }),
                Duration::from_millis(100),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }
}
