//! In-process transport: every node registers its consumer channel in a
//! shared [`InmemNetwork`] keyed by address.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::messages::{Rpc, RpcCommand, RpcReply};
use super::transport::{Transport, TransportError, TransportResult};
use crate::config::CHANNEL_CAPACITY;

#[derive(Default)]
pub struct InmemNetwork {
    routes: DashMap<String, mpsc::Sender<Rpc>>,
}

impl InmemNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A transport reachable at `addr`. Replaces any previous one there.
    pub fn transport(
        self: &Arc<Self>,
        addr: impl Into<String>,
        timeout: Duration,
        join_timeout: Duration,
    ) -> InmemTransport {
        let addr = addr.into();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.routes.insert(addr.clone(), tx);
        InmemTransport {
            network: Arc::clone(self),
            addr,
            consumer: Mutex::new(Some(rx)),
            timeout,
            join_timeout,
        }
    }

    /// Make `addr` unreachable, as if its node crashed.
    pub fn disconnect(&self, addr: &str) {
        self.routes.remove(addr);
    }
}

pub struct InmemTransport {
    network: Arc<InmemNetwork>,
    addr: String,
    consumer: Mutex<Option<mpsc::Receiver<Rpc>>>,
    timeout: Duration,
    join_timeout: Duration,
}

#[async_trait]
impl Transport for InmemTransport {
    fn local_addr(&self) -> String {
        self.addr.clone()
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
        let route = self
            .network
            .routes
            .get(target)
            .map(|r| r.value().clone())
            .ok_or_else(|| TransportError::Unreachable(target.to_string()))?;

        let (rpc, reply) = Rpc::new(command);
        route
            .send(rpc)
            .await
            .map_err(|_| TransportError::Unreachable(target.to_string()))?;

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(Ok(reply))) => Ok(reply),
            Ok(Ok(Err(remote))) => Err(TransportError::Remote(remote)),
            Ok(Err(_)) => Err(TransportError::Unreachable(target.to_string())),
            Err(_) => Err(TransportError::Timeout(target.to_string())),
        }
    }

    fn take_consumer(&self) -> Option<mpsc::Receiver<Rpc>> {
        self.consumer.lock().take()
    }

    async fn close(&self) {
        self.network.disconnect(&self.addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::messages::{EagerSyncRequest, EagerSyncResponse, SyncRequest};
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn request_reaches_consumer_and_returns_reply() {
        let net = InmemNetwork::new();
        let a = net.transport("a", Duration::from_secs(1), Duration::from_secs(1));
        let b = net.transport("b", Duration::from_secs(1), Duration::from_secs(1));

        let mut consumer = b.take_consumer().unwrap();
        tokio::spawn(async move {
            while let Some(rpc) = consumer.recv().await {
                rpc.respond(Ok(RpcReply::EagerSync(EagerSyncResponse {
                    from_id: 2,
                    success: true,
                })));
            }
        });

        let reply = a
            .eager_sync("b", EagerSyncRequest { from_id: 1, events: vec![] })
            .await
            .unwrap();
        assert!(reply.success);
    }

    #[tokio::test]
    async fn unknown_target_is_unreachable() {
        let net = InmemNetwork::new();
        let a = net.transport("a", Duration::from_secs(1), Duration::from_secs(1));
        let err = a
            .sync("nowhere", SyncRequest { from_id: 1, known: BTreeMap::new(), sync_limit: 10 })
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Unreachable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let net = InmemNetwork::new();
        let a = net.transport("a", Duration::from_millis(100), Duration::from_secs(1));
        let b = net.transport("b", Duration::from_millis(100), Duration::from_secs(1));
        // Hold the consumer without answering.
        let _consumer = b.take_consumer().unwrap();

        let err = a
            .sync("b", SyncRequest { from_id: 1, known: BTreeMap::new(), sync_limit: 10 })
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
    }
}
