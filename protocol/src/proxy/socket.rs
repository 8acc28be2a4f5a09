//! # Socket Proxy
//!
//! Runs the application in its own process. Two TCP links, both carrying
//! the gossip transport's length-prefixed bincode frames:
//!
//! ```text
//!   node                                      application
//!   SocketAppProxy ──── AppRequest ─────────► SocketNodeProxy ──► ProxyHandler
//!     dials client_addr  ◄── AppReply ──────    listens on client_addr
//!
//!   SocketAppProxy ◄─── NodeRequest ───────── SocketNodeProxy::submit_tx
//!     listens on proxy_addr  ── ack ────────►   dials proxy_addr
//! ```
//!
//! Each side keeps a single outgoing connection, dialed on first use and
//! dropped after any failure or timeout so the next call redials.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace};

use super::{AppProxy, CommitResponse, ProxyError, ProxyHandler, ProxyResult};
use crate::config::CHANNEL_CAPACITY;
use crate::hashgraph::Block;
use crate::net::tcp::{read_frame, write_frame};
use crate::net::TransportError;

/// Node to application.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppRequest {
    CommitBlock(Block),
    GetSnapshot(u64),
    Restore(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppReply {
    Committed(CommitResponse),
    Snapshot(Vec<u8>),
    Restored,
}

/// Application to node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRequest {
    SubmitTx(Vec<u8>),
}

/// What travels back on either link. Handler errors cross as strings.
type Reply<T> = Result<T, String>;

impl From<TransportError> for ProxyError {
    fn from(e: TransportError) -> Self {
        ProxyError::Socket(e.to_string())
    }
}

async fn bind(addr: &str) -> ProxyResult<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| ProxyError::Socket(format!("cannot listen on {addr}: {e}")))
}

fn local_addr(listener: &TcpListener) -> ProxyResult<String> {
    Ok(listener
        .local_addr()
        .map_err(|e| ProxyError::Socket(e.to_string()))?
        .to_string())
}

// ---------------------------------------------------------------------------
// Outgoing link
// ---------------------------------------------------------------------------

struct Link {
    target: String,
    timeout: Duration,
    stream: tokio::sync::Mutex<Option<TcpStream>>,
}

impl Link {
    fn new(target: String, timeout: Duration) -> Self {
        Self {
            target,
            timeout,
            stream: tokio::sync::Mutex::new(None),
        }
    }

    /// One request, one reply. Calls are serialized over the connection.
    async fn call<Req: Serialize, Rep: DeserializeOwned>(&self, request: &Req) -> ProxyResult<Rep> {
        let mut slot = self.stream.lock().await;
        let exchange = async {
            let mut stream = match slot.take() {
                Some(stream) => stream,
                None => TcpStream::connect(&self.target)
                    .await
                    .map_err(|e| ProxyError::Socket(format!("cannot reach {}: {e}", self.target)))?,
            };
            write_frame(&mut stream, request).await?;
            let reply: Reply<Rep> = read_frame(&mut stream).await?;
            Ok::<_, ProxyError>((stream, reply))
        };
        let (stream, reply) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ProxyError::Socket(format!("{} timed out", self.target)))??;
        *slot = Some(stream);
        reply.map_err(ProxyError::Remote)
    }
}

// ---------------------------------------------------------------------------
// Incoming requests
// ---------------------------------------------------------------------------

/// Accept connections until `shutdown` fires or its sender is dropped.
async fn serve<Req, Rep, F, Fut>(listener: TcpListener, mut shutdown: watch::Receiver<bool>, handle: F)
where
    Req: DeserializeOwned + Send + 'static,
    Rep: Serialize + Send + Sync + 'static,
    F: Fn(Req) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Reply<Rep>> + Send + 'static,
{
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("proxy listener stopping");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    trace!(%remote, "proxy connection");
                    tokio::spawn(serve_connection(stream, shutdown.clone(), handle.clone()));
                }
                Err(e) => debug!(error = %e, "proxy accept failed"),
            }
        }
    }
}

async fn serve_connection<Req, Rep, F, Fut>(
    mut stream: TcpStream,
    mut shutdown: watch::Receiver<bool>,
    handle: F,
) where
    Req: DeserializeOwned + Send + 'static,
    Rep: Serialize + Send + Sync + 'static,
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Reply<Rep>> + Send + 'static,
{
    loop {
        let request: Req = tokio::select! {
            _ = shutdown.changed() => return,
            read = read_frame(&mut stream) => match read {
                Ok(request) => request,
                Err(_) => return,
            }
        };
        let reply = handle(request).await;
        if let Err(e) = write_frame(&mut stream, &reply).await {
            debug!(error = %e, "failed to write proxy reply");
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// Node side
// ---------------------------------------------------------------------------

/// [`AppProxy`] for an application reached over TCP.
pub struct SocketAppProxy {
    local_addr: String,
    app: Link,
    submit_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    shutdown: watch::Sender<bool>,
}

impl SocketAppProxy {
    /// Accept submissions on `bind_addr` and deliver blocks to the
    /// application listening on `client_addr`. Every call to the
    /// application is bounded by `timeout`.
    pub async fn bind(
        bind_addr: &str,
        client_addr: impl Into<String>,
        timeout: Duration,
    ) -> ProxyResult<Self> {
        let listener = bind(bind_addr).await?;
        let local_addr = local_addr(&listener)?;
        let client_addr = client_addr.into();
        let (submit_tx, submit_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (shutdown, shutdown_rx) = watch::channel(false);

        info!(addr = %local_addr, app = %client_addr, "socket proxy listening");
        tokio::spawn(serve(listener, shutdown_rx, move |request: NodeRequest| {
            let submit = submit_tx.clone();
            async move {
                match request {
                    NodeRequest::SubmitTx(tx) => {
                        trace!(bytes = tx.len(), "transaction over socket");
                        submit
                            .send(tx)
                            .await
                            .map_err(|_| "node is not accepting transactions".to_string())
                    }
                }
            }
        }));

        Ok(Self {
            local_addr,
            app: Link::new(client_addr, timeout),
            submit_rx: Mutex::new(Some(submit_rx)),
            shutdown,
        })
    }

    /// Where the application submits transactions.
    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }
}

impl Drop for SocketAppProxy {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

fn unexpected(reply: AppReply) -> ProxyError {
    ProxyError::Socket(format!("unexpected reply from application: {reply:?}"))
}

#[async_trait]
impl AppProxy for SocketAppProxy {
    fn submit_receiver(&self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.submit_rx.lock().take()
    }

    async fn commit_block(&self, block: &Block) -> ProxyResult<CommitResponse> {
        match self.app.call(&AppRequest::CommitBlock(block.clone())).await? {
            AppReply::Committed(response) => {
                debug!(
                    index = block.index,
                    state_hash = %hex::encode(response.state_hash),
                    "committed block over socket"
                );
                Ok(response)
            }
            other => Err(unexpected(other)),
        }
    }

    async fn get_snapshot(&self, block_index: u64) -> ProxyResult<Vec<u8>> {
        match self.app.call(&AppRequest::GetSnapshot(block_index)).await? {
            AppReply::Snapshot(snapshot) => Ok(snapshot),
            other => Err(unexpected(other)),
        }
    }

    async fn restore(&self, snapshot: &[u8]) -> ProxyResult<()> {
        match self.app.call(&AppRequest::Restore(snapshot.to_vec())).await? {
            AppReply::Restored => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Application side
// ---------------------------------------------------------------------------

/// The application's end: serves a [`ProxyHandler`] to the node and submits
/// transactions to it.
pub struct SocketNodeProxy {
    local_addr: String,
    node: Link,
    shutdown: watch::Sender<bool>,
}

impl SocketNodeProxy {
    /// Serve `handler` on `bind_addr` for the node whose proxy listens on
    /// `node_addr`.
    pub async fn bind<H: ProxyHandler + 'static>(
        bind_addr: &str,
        node_addr: impl Into<String>,
        handler: Arc<H>,
        timeout: Duration,
    ) -> ProxyResult<Self> {
        Self::serve(bind(bind_addr).await?, node_addr, handler, timeout)
    }

    /// Like [`bind`](Self::bind), on a listener that is already bound.
    pub fn serve<H: ProxyHandler + 'static>(
        listener: TcpListener,
        node_addr: impl Into<String>,
        handler: Arc<H>,
        timeout: Duration,
    ) -> ProxyResult<Self> {
        let local_addr = local_addr(&listener)?;
        let node_addr = node_addr.into();
        let (shutdown, shutdown_rx) = watch::channel(false);

        info!(addr = %local_addr, node = %node_addr, "application proxy listening");
        tokio::spawn(serve(listener, shutdown_rx, move |request: AppRequest| {
            let handler = Arc::clone(&handler);
            async move { answer(handler.as_ref(), request) }
        }));

        Ok(Self {
            local_addr,
            node: Link::new(node_addr, timeout),
            shutdown,
        })
    }

    /// Where the node delivers blocks.
    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    pub async fn submit_tx(&self, tx: impl Into<Vec<u8>>) -> ProxyResult<()> {
        self.node.call(&NodeRequest::SubmitTx(tx.into())).await
    }
}

impl Drop for SocketNodeProxy {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

fn answer<H: ProxyHandler + ?Sized>(handler: &H, request: AppRequest) -> Reply<AppReply> {
    let result = match request {
        AppRequest::CommitBlock(block) => handler.commit_handler(&block).map(AppReply::Committed),
        AppRequest::GetSnapshot(index) => handler.snapshot_handler(index).map(AppReply::Snapshot),
        AppRequest::Restore(snapshot) => handler.restore_handler(&snapshot).map(|()| AppReply::Restored),
    };
    result.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::DummyState;

    const TIMEOUT: Duration = Duration::from_secs(2);

    /// A node-side proxy wired to a dummy application.
    async fn pair() -> (SocketAppProxy, SocketNodeProxy, Arc<DummyState>) {
        let app_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let app_addr = app_listener.local_addr().unwrap().to_string();
        let node_side = SocketAppProxy::bind("127.0.0.1:0", app_addr, TIMEOUT)
            .await
            .unwrap();
        let state = Arc::new(DummyState::new());
        let app_side =
            SocketNodeProxy::serve(app_listener, node_side.local_addr(), Arc::clone(&state), TIMEOUT)
                .unwrap();
        (node_side, app_side, state)
    }

    #[tokio::test]
    async fn blocks_reach_the_remote_application() {
        let (node_side, _app_side, state) = pair().await;

        let block = Block::new(0, 1, [0; 32], [0; 32], vec![b"tx".to_vec()], vec![]);
        let response = node_side.commit_block(&block).await.unwrap();
        assert_eq!(response.state_hash, state.state_hash());
        assert_eq!(state.committed_transactions(), vec![b"tx".to_vec()]);

        let snapshot = node_side.get_snapshot(0).await.unwrap();
        assert_eq!(snapshot, state.state_hash().to_vec());
        assert!(matches!(
            node_side.get_snapshot(9).await,
            Err(ProxyError::Remote(_))
        ));

        node_side.restore(&[7u8; 32]).await.unwrap();
        assert_eq!(state.state_hash(), [7u8; 32]);
        assert!(matches!(
            node_side.restore(b"short").await,
            Err(ProxyError::Remote(_))
        ));
    }

    #[tokio::test]
    async fn submissions_reach_the_node() {
        let (node_side, app_side, _) = pair().await;
        let mut submissions = node_side.submit_receiver().unwrap();
        assert!(node_side.submit_receiver().is_none());

        app_side.submit_tx("hello").await.unwrap();
        app_side.submit_tx("again").await.unwrap();
        assert_eq!(submissions.recv().await, Some(b"hello".to_vec()));
        assert_eq!(submissions.recv().await, Some(b"again".to_vec()));
    }

    #[tokio::test]
    async fn unreachable_application_is_an_error() {
        let gone = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = gone.local_addr().unwrap().to_string();
        drop(gone);

        let node_side = SocketAppProxy::bind("127.0.0.1:0", addr, TIMEOUT).await.unwrap();
        let block = Block::new(0, 1, [0; 32], [0; 32], vec![], vec![]);
        assert!(matches!(
            node_side.commit_block(&block).await,
            Err(ProxyError::Socket(_))
        ));
    }
}
