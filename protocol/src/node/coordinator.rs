//! # Gossip Coordinator
//!
//! [`Node`] owns the [`Core`] and runs a single `select!` loop over:
//!
//! 1. the heartbeat, which starts a sync with a random peer (or, depending
//!    on the state, a join or fast-forward attempt);
//! 2. incoming RPCs from the transport;
//! 3. transactions submitted by the application;
//! 4. results of finished sync workers;
//! 5. control messages from [`NodeHandle`]s, and the shutdown signal.
//!
//! The heartbeat runs at `heartbeat` while there is work pending and at
//! `slow_heartbeat` otherwise.
//!
//! ## Sync
//!
//! A sync is a pull followed by a push. The worker sends our digest and
//! receives the events we lack plus the peer's digest. Back in the loop we
//! insert them, record the sync with a new event, run consensus and commit
//! any new block. Then a second worker pushes what the peer lacks, unless
//! that is more than one batch: such a peer pulls for itself. At most
//! `max_pool` workers run at once; a heartbeat that finds them all busy is
//! skipped.
//!
//! A pull that hits the sync limit switches to fast-forward only when the
//! peer's consensus is more than `FRAME_DEPTH` rounds ahead of ours.
//! Otherwise the partial batch is inserted and the next pull continues.
//!
//! ## Commit
//!
//! Blocks are committed one at a time, in order. A commit the application
//! rejects is retried every `commit_retry_delay` until it succeeds or the
//! node shuts down.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info, trace, warn};

use super::core::Core;
use super::peer_selector::{PeerSelector, RandomPeerSelector};
use super::state::NodeState;
use super::validator::Validator;
use super::{NodeError, NodeResult};
use crate::config::{NodeConfig, CHANNEL_CAPACITY, FRAME_DEPTH};
use crate::hashgraph::{
    Block, Event, HashgraphConfig, HashgraphError, InternalTransaction, Store, TransactionType,
};
use crate::net::{
    EagerSyncRequest, EagerSyncResponse, FastForwardRequest, FastForwardResponse, JoinRequest,
    JoinResponse, Rpc, RpcCommand, RpcReply, RpcResult, SyncRequest, SyncResponse, Transport,
    TransportError,
};
use crate::peers::{Peer, PeerId, PeerSet};
use crate::proxy::{AppProxy, CommitResponse};

// ---------------------------------------------------------------------------
// Stats & handle
// ---------------------------------------------------------------------------

/// Point-in-time view of a node, refreshed on every loop iteration.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NodeStats {
    pub id: PeerId,
    pub moniker: String,
    pub state: NodeState,
    pub last_consensus_round: Option<u64>,
    pub last_block_index: Option<u64>,
    pub consensus_events: u64,
    pub consensus_transactions: u64,
    pub undetermined_events: usize,
    pub transaction_pool: usize,
    pub num_peers: usize,
    /// Share of sync attempts that succeeded.
    pub sync_rate: f64,
}

struct Shared {
    stats: RwLock<NodeStats>,
    peers: RwLock<Vec<Peer>>,
    genesis_peers: Vec<Peer>,
    store: Arc<dyn Store>,
}

enum Control {
    Leave(oneshot::Sender<NodeResult<()>>),
}

/// Talks to a running [`Node`] from other tasks.
#[derive(Clone)]
pub struct NodeHandle {
    shared: Arc<Shared>,
    control: mpsc::Sender<Control>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl NodeHandle {
    pub fn stats(&self) -> NodeStats {
        self.shared.stats.read().clone()
    }

    pub fn state(&self) -> NodeState {
        self.shared.stats.read().state
    }

    pub fn id(&self) -> PeerId {
        self.shared.stats.read().id
    }

    /// The newest peer set.
    pub fn peers(&self) -> Vec<Peer> {
        self.shared.peers.read().clone()
    }

    pub fn genesis_peers(&self) -> Vec<Peer> {
        self.shared.genesis_peers.clone()
    }

    /// A committed block.
    pub fn block(&self, index: u64) -> NodeResult<Option<Block>> {
        Ok(self.shared.store.get_block(index)?)
    }

    /// Ask to be removed from the peer set and wait until the removal is
    /// committed. The node shuts down afterwards either way.
    pub async fn leave(&self) -> NodeResult<()> {
        let (tx, rx) = oneshot::channel();
        self.control
            .send(Control::Leave(tx))
            .await
            .map_err(|_| NodeError::Shutdown)?;
        rx.await.map_err(|_| NodeError::Shutdown)?
    }

    /// Stop the node. In-flight commits finish first.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

enum SyncOutcome {
    Pulled { peer: Peer, response: SyncResponse },
    Failed { peer: Peer, error: TransportError },
}

pub struct Node {
    config: NodeConfig,
    core: Core,
    state: NodeState,
    net_addr: String,
    transport: Arc<dyn Transport>,
    proxy: Arc<dyn AppProxy>,
    selector: Box<dyn PeerSelector>,
    shared: Arc<Shared>,

    control_tx: mpsc::Sender<Control>,
    control_rx: mpsc::Receiver<Control>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,

    workers: Arc<Semaphore>,
    pool_size: u32,
    results_tx: mpsc::Sender<SyncOutcome>,
    results_rx: mpsc::Receiver<SyncOutcome>,

    /// Join requests waiting for their `PeerAdd` to commit, by transaction
    /// hash.
    pending_joins: HashMap<[u8; 32], Vec<oneshot::Sender<RpcResult>>>,
    pending_leave: Option<(oneshot::Sender<NodeResult<()>>, Instant)>,

    sync_requests: u64,
    sync_errors: u64,
}

impl Node {
    /// A node for `validator`. `peers` is the current peer set as read from
    /// disk: if it does not list us we start by joining. Consensus always
    /// starts from `genesis`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: NodeConfig,
        validator: Validator,
        peers: &PeerSet,
        genesis: PeerSet,
        store: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
        proxy: Arc<dyn AppProxy>,
    ) -> NodeResult<Self> {
        let id = validator.id();
        let moniker = validator.moniker().to_string();
        let genesis_peers = genesis.peers().to_vec();
        let core = Core::new(
            validator,
            Arc::clone(&store),
            genesis,
            HashgraphConfig::from(&config),
        )?;

        let state = if peers.contains(id) {
            NodeState::Babbling
        } else {
            NodeState::Joining
        };

        let shared = Arc::new(Shared {
            stats: RwLock::new(NodeStats {
                id,
                moniker,
                state,
                last_consensus_round: None,
                last_block_index: None,
                consensus_events: 0,
                consensus_transactions: 0,
                undetermined_events: 0,
                transaction_pool: 0,
                num_peers: peers.len(),
                sync_rate: 1.0,
            }),
            peers: RwLock::new(peers.peers().to_vec()),
            genesis_peers,
            store,
        });

        let (control_tx, control_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (results_tx, results_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let pool_size = config.max_pool.max(1) as u32;

        Ok(Self {
            net_addr: transport.local_addr(),
            selector: Box::new(RandomPeerSelector::new(id)),
            config,
            core,
            state,
            transport,
            proxy,
            shared,
            control_tx,
            control_rx,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            workers: Arc::new(Semaphore::new(pool_size as usize)),
            pool_size,
            results_tx,
            results_rx,
            pending_joins: HashMap::new(),
            pending_leave: None,
            sync_requests: 0,
            sync_errors: 0,
        })
    }

    pub fn with_peer_selector(mut self, selector: Box<dyn PeerSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            shared: Arc::clone(&self.shared),
            control: self.control_tx.clone(),
            shutdown: Arc::clone(&self.shutdown_tx),
        }
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Replay events from a persistent store and deliver the blocks they
    /// produce to the application again.
    pub async fn bootstrap(&mut self, events: Vec<Event>) -> NodeResult<()> {
        let inserted = self.core.bootstrap(events)?;
        self.commit_blocks().await?;
        info!(
            inserted,
            last_block = ?self.core.hashgraph().last_block_index(),
            "bootstrap complete"
        );
        self.publish();
        Ok(())
    }

    /// Run the node on its own task.
    pub fn spawn(self) -> (NodeHandle, JoinHandle<NodeResult<()>>) {
        let handle = self.handle();
        (handle, tokio::spawn(self.run()))
    }

    /// Run until shut down. Returns an error only if the node had to halt.
    pub async fn run(mut self) -> NodeResult<()> {
        let mut rpcs = self
            .transport
            .take_consumer()
            .ok_or(NodeError::ConsumerTaken)?;
        let mut submissions = self.proxy.submit_receiver();

        info!(
            id = self.core.id(),
            addr = %self.net_addr,
            state = %self.state,
            "node running"
        );

        let heartbeat = sleep(self.heartbeat_interval());
        tokio::pin!(heartbeat);

        let result = loop {
            self.publish();
            if self.state == NodeState::Shutdown {
                break Ok(());
            }

            let step = tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    info!("shutdown requested");
                    self.set_state(NodeState::Shutdown);
                    Ok(())
                }
                _ = &mut heartbeat => {
                    let step = self.on_heartbeat().await;
                    heartbeat.as_mut().reset(Instant::now() + self.heartbeat_interval());
                    step
                }
                Some(rpc) = rpcs.recv() => self.process_rpc(rpc).await,
                Some(tx) = next_submission(&mut submissions) => {
                    trace!(bytes = tx.len(), "transaction submitted");
                    self.core.add_transactions([tx]);
                    Ok(())
                }
                Some(outcome) = self.results_rx.recv() => self.on_sync_outcome(outcome).await,
                Some(control) = self.control_rx.recv() => self.on_control(control),
            };

            if let Err(e) = step {
                error!(error = %e, "fatal error, halting");
                break Err(e);
            }
        };

        self.stop().await;
        result
    }

    // -- Loop steps -----------------------------------------------------

    fn heartbeat_interval(&self) -> Duration {
        if self.state.is_gossiping() && self.core.busy() {
            self.config.heartbeat
        } else {
            self.config.slow_heartbeat
        }
    }

    fn set_state(&mut self, state: NodeState) {
        if self.state != state {
            info!(from = %self.state, to = %state, "state change");
            self.state = state;
        }
    }

    async fn on_heartbeat(&mut self) -> NodeResult<()> {
        match self.state {
            NodeState::Babbling | NodeState::Leaving => {
                self.check_leave_deadline();
                self.gossip().await
            }
            NodeState::Joining => self.join().await,
            NodeState::CatchingUp => self.fast_forward().await,
            NodeState::Shutdown => Ok(()),
        }
    }

    async fn gossip(&mut self) -> NodeResult<()> {
        let has_head = self
            .core
            .hashgraph()
            .last_event_from(self.core.id())?
            .is_some();
        if !has_head && self.core.is_validator()? {
            self.core.create_self_event(None)?;
        }

        if self.core.is_alone()? {
            if self.core.busy() {
                self.core.create_self_event(None)?;
                self.core.run_consensus()?;
                self.commit_blocks().await?;
            }
            return Ok(());
        }

        let peers = self.core.hashgraph().latest_peer_set()?.peers().to_vec();
        let Some(peer) = self.selector.next(&peers) else {
            return Ok(());
        };
        let Some(permit) = self.worker_permit() else {
            trace!("sync workers busy, skipping heartbeat");
            return Ok(());
        };

        let request = SyncRequest {
            from_id: self.core.id(),
            known: self.core.known_events()?,
            sync_limit: self.config.sync_limit,
        };
        let transport = Arc::clone(&self.transport);
        let results = self.results_tx.clone();
        self.sync_requests += 1;

        tokio::spawn(async move {
            let outcome = match transport.sync(&peer.net_addr, request).await {
                Ok(response) => SyncOutcome::Pulled { peer, response },
                Err(error) => SyncOutcome::Failed { peer, error },
            };
            let _ = results.send(outcome).await;
            drop(permit);
        });
        Ok(())
    }

    fn worker_permit(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.workers).try_acquire_owned().ok()
    }

    async fn on_sync_outcome(&mut self, outcome: SyncOutcome) -> NodeResult<()> {
        let (peer, response) = match outcome {
            SyncOutcome::Pulled { peer, response } => (peer, response),
            SyncOutcome::Failed { peer, error } => {
                self.sync_errors += 1;
                debug!(peer = %peer.net_addr, error = %error, "sync failed");
                return Ok(());
            }
        };
        if !self.state.is_gossiping() {
            return Ok(());
        }

        let ours = self.core.hashgraph().last_consensus_round();
        if response.sync_limit_reached
            && self.config.enable_fast_sync
            && far_behind(ours, response.last_consensus_round)
        {
            info!(
                peer = %peer.net_addr,
                ours = ?ours,
                theirs = ?response.last_consensus_round,
                "too far behind, catching up"
            );
            self.set_state(NodeState::CatchingUp);
            return Ok(());
        }

        self.core.sync(response.from_id, response.events)?;
        self.core.run_consensus()?;
        self.commit_blocks().await?;
        self.push(peer, &response.known)
    }

    /// Send `peer` the events its digest says it lacks.
    fn push(&mut self, peer: Peer, known: &BTreeMap<PeerId, u64>) -> NodeResult<()> {
        let (events, limited) = self.core.events_diff(known, self.config.sync_limit)?;
        if events.is_empty() || limited {
            return Ok(());
        }
        let Some(permit) = self.worker_permit() else {
            return Ok(());
        };

        let request = EagerSyncRequest {
            from_id: self.core.id(),
            events,
        };
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            match transport.eager_sync(&peer.net_addr, request).await {
                Ok(EagerSyncResponse { success: true, .. }) => {}
                Ok(_) => debug!(peer = %peer.net_addr, "eager sync refused"),
                Err(e) => debug!(peer = %peer.net_addr, error = %e, "eager sync failed"),
            }
            drop(permit);
        });
        Ok(())
    }

    async fn join(&mut self) -> NodeResult<()> {
        let peers = self.core.hashgraph().latest_peer_set()?.peers().to_vec();
        let Some(peer) = self.selector.next(&peers) else {
            return Ok(());
        };
        let request = JoinRequest {
            internal_transaction: self
                .core
                .validator()
                .membership_request(TransactionType::PeerAdd, &self.net_addr),
        };

        info!(peer = %peer.net_addr, "requesting to join");
        let response = tokio::select! {
            r = self.transport.join(&peer.net_addr, request) => r,
            _ = self.shutdown_rx.changed() => {
                self.set_state(NodeState::Shutdown);
                return Ok(());
            }
        };

        match response {
            Ok(JoinResponse {
                accepted: true,
                accepted_round,
                ..
            }) => {
                info!(accepted_round, "join accepted");
                self.set_state(if self.config.enable_fast_sync {
                    NodeState::CatchingUp
                } else {
                    NodeState::Babbling
                });
                Ok(())
            }
            Ok(_) => Err(NodeError::JoinRefused),
            Err(e) => {
                warn!(peer = %peer.net_addr, error = %e, "join attempt failed");
                Ok(())
            }
        }
    }

    async fn fast_forward(&mut self) -> NodeResult<()> {
        let peers = self.core.hashgraph().latest_peer_set()?.peers().to_vec();
        let Some(peer) = self.selector.next(&peers) else {
            return Ok(());
        };
        let request = FastForwardRequest {
            from_id: self.core.id(),
        };

        let response = tokio::select! {
            r = self.transport.fast_forward(&peer.net_addr, request) => r,
            _ = self.shutdown_rx.changed() => {
                self.set_state(NodeState::Shutdown);
                return Ok(());
            }
        };
        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!(peer = %peer.net_addr, error = %e, "fast-forward failed");
                return Ok(());
            }
        };

        let index = response.block.index;
        match self
            .core
            .fast_forward(response.block, response.frame, response.peer_sets)
        {
            Ok(()) => {}
            Err(NodeError::Hashgraph(HashgraphError::Store(e))) => return Err(e.into()),
            Err(e) => {
                warn!(peer = %peer.net_addr, error = %e, "bad fast-forward response");
                return Ok(());
            }
        }
        if let Err(e) = self.proxy.restore(&response.snapshot).await {
            warn!(index, error = %e, "application restore failed");
            return Ok(());
        }

        info!(index, peer = %peer.net_addr, "fast-forwarded");
        self.set_state(NodeState::Babbling);
        Ok(())
    }

    fn on_control(&mut self, control: Control) -> NodeResult<()> {
        match control {
            Control::Leave(reply) => {
                if !self.core.is_validator()? || self.core.is_alone()? {
                    info!("leaving");
                    let _ = reply.send(Ok(()));
                    self.set_state(NodeState::Shutdown);
                    return Ok(());
                }
                let itx = self
                    .core
                    .validator()
                    .membership_request(TransactionType::PeerRemove, &self.net_addr);
                self.core.add_internal_transaction(itx);
                self.pending_leave = Some((reply, Instant::now() + self.config.join_timeout));
                self.set_state(NodeState::Leaving);
                Ok(())
            }
        }
    }

    fn check_leave_deadline(&mut self) {
        let expired = self
            .pending_leave
            .as_ref()
            .is_some_and(|(_, deadline)| Instant::now() >= *deadline);
        if expired {
            if let Some((reply, _)) = self.pending_leave.take() {
                warn!("leave not committed in time");
                let _ = reply.send(Err(NodeError::LeaveTimeout));
            }
            self.set_state(NodeState::Shutdown);
        }
    }

    // -- Blocks ---------------------------------------------------------

    async fn commit_blocks(&mut self) -> NodeResult<()> {
        while let Some(block) = self.core.next_block()? {
            let Some(response) = self.commit_with_retry(&block).await else {
                return Ok(());
            };
            let block = self.core.commit(block, response)?;
            info!(
                index = block.index,
                round_received = block.round_received,
                transactions = block.transactions.len(),
                state_hash = %hex::encode(block.state_hash),
                "block committed"
            );
            self.after_commit(&block)?;
        }
        Ok(())
    }

    /// `None` if the node was shut down while retrying.
    async fn commit_with_retry(&mut self, block: &Block) -> Option<CommitResponse> {
        loop {
            match self.proxy.commit_block(block).await {
                Ok(response) => return Some(response),
                Err(e) => {
                    warn!(index = block.index, error = %e, "commit failed, retrying");
                    tokio::select! {
                        _ = sleep(self.config.commit_retry_delay) => {}
                        _ = self.shutdown_rx.changed() => {
                            self.set_state(NodeState::Shutdown);
                            return None;
                        }
                    }
                }
            }
        }
    }

    /// Answer the joins and the leave decided by `block`.
    fn after_commit(&mut self, block: &Block) -> NodeResult<()> {
        let hg = self.core.hashgraph();
        let accepted_round = block.round_received + hg.config().membership_anchor_offset;
        let peers = hg.latest_peer_set()?.peers().to_vec();

        for receipt in &block.internal_transaction_receipts {
            let Some(waiters) = self
                .pending_joins
                .remove(&receipt.internal_transaction.hash())
            else {
                continue;
            };
            info!(
                peer = %receipt.internal_transaction.body.peer.net_addr,
                accepted = receipt.accepted,
                accepted_round,
                "join decided"
            );
            for waiter in waiters {
                let _ = waiter.send(Ok(RpcReply::Join(JoinResponse {
                    from_id: self.core.id(),
                    accepted: receipt.accepted,
                    accepted_round,
                    peers: peers.clone(),
                })));
            }
        }

        if self.pending_leave.is_some() && !self.core.is_validator()? {
            if let Some((reply, _)) = self.pending_leave.take() {
                info!(index = block.index, "leave committed");
                let _ = reply.send(Ok(()));
            }
            self.set_state(NodeState::Shutdown);
        }
        Ok(())
    }

    // -- RPC ------------------------------------------------------------

    async fn process_rpc(&mut self, rpc: Rpc) -> NodeResult<()> {
        let Rpc {
            command,
            respond_to,
        } = rpc;
        let reply = match command {
            RpcCommand::Join(request) => {
                return self.process_join(request.internal_transaction, respond_to);
            }
            command => self.answer(command).await,
        };
        match reply {
            Ok(reply) => {
                let _ = respond_to.send(reply);
                Ok(())
            }
            Err(e) => {
                let _ = respond_to.send(Err(e.to_string()));
                Err(e)
            }
        }
    }

    async fn answer(&mut self, command: RpcCommand) -> NodeResult<RpcResult> {
        match command {
            RpcCommand::Sync(request) => {
                let limit = request.sync_limit.clamp(1, self.config.sync_limit.max(1));
                let (events, sync_limit_reached) = self.core.events_diff(&request.known, limit)?;
                trace!(from = request.from_id, events = events.len(), "answering sync");
                Ok(Ok(RpcReply::Sync(SyncResponse {
                    from_id: self.core.id(),
                    events,
                    known: self.core.known_events()?,
                    sync_limit_reached,
                    last_consensus_round: self.core.hashgraph().last_consensus_round(),
                })))
            }
            RpcCommand::EagerSync(request) => {
                if !self.state.is_gossiping() {
                    return Ok(Err(format!("not accepting events while {}", self.state)));
                }
                self.core.sync(request.from_id, request.events)?;
                self.core.run_consensus()?;
                self.commit_blocks().await?;
                Ok(Ok(RpcReply::EagerSync(EagerSyncResponse {
                    from_id: self.core.id(),
                    success: true,
                })))
            }
            RpcCommand::FastForward(request) => {
                let Some((block, frame, peer_sets)) = self.core.anchor()? else {
                    return Ok(Err("no committed block yet".to_string()));
                };
                let snapshot = match self.proxy.get_snapshot(block.index).await {
                    Ok(s) => s,
                    Err(e) => return Ok(Err(e.to_string())),
                };
                debug!(from = request.from_id, index = block.index, "answering fast-forward");
                Ok(Ok(RpcReply::FastForward(Box::new(FastForwardResponse {
                    from_id: self.core.id(),
                    block,
                    frame,
                    snapshot,
                    peer_sets,
                }))))
            }
            RpcCommand::Join(_) => Ok(Err("unexpected join".to_string())),
        }
    }

    /// Submit a join request into our next event. The reply is sent once
    /// the block carrying it commits.
    fn process_join(
        &mut self,
        itx: InternalTransaction,
        respond_to: oneshot::Sender<RpcResult>,
    ) -> NodeResult<()> {
        if self.state != NodeState::Babbling || !self.core.is_validator()? {
            let _ = respond_to.send(Err(format!("cannot sponsor a join while {}", self.state)));
            return Ok(());
        }
        if itx.body.kind != TransactionType::PeerAdd || !itx.verify() {
            let _ = respond_to.send(Err("invalid join request".to_string()));
            return Ok(());
        }

        let latest = self.core.hashgraph().latest_peer_set()?;
        if latest.contains(itx.body.peer.id()) {
            let _ = respond_to.send(Ok(RpcReply::Join(JoinResponse {
                from_id: self.core.id(),
                accepted: true,
                accepted_round: latest.round(),
                peers: latest.peers().to_vec(),
            })));
            return Ok(());
        }

        info!(peer = %itx.body.peer.net_addr, "join requested");
        let waiters = self.pending_joins.entry(itx.hash()).or_default();
        if waiters.is_empty() {
            self.core.add_internal_transaction(itx);
        }
        waiters.push(respond_to);
        Ok(())
    }

    // -- Shutdown & stats -----------------------------------------------

    async fn stop(&mut self) {
        self.set_state(NodeState::Shutdown);
        if let Some((reply, _)) = self.pending_leave.take() {
            let _ = reply.send(Err(NodeError::Shutdown));
        }
        // Every worker is bounded by a transport timeout.
        let drained = tokio::time::timeout(
            self.config.join_timeout,
            self.workers.acquire_many(self.pool_size),
        )
        .await;
        if drained.is_err() {
            warn!("sync workers still running at shutdown");
        }
        self.transport.close().await;
        self.publish();
        info!(id = self.core.id(), "node stopped");
    }

    fn publish(&self) {
        let hg = self.core.hashgraph();
        let peers = hg
            .latest_peer_set()
            .map(|ps| ps.peers().to_vec())
            .unwrap_or_default();
        let sync_rate = if self.sync_requests == 0 {
            1.0
        } else {
            1.0 - self.sync_errors as f64 / self.sync_requests as f64
        };

        let mut stats = self.shared.stats.write();
        stats.state = self.state;
        stats.last_consensus_round = hg.last_consensus_round();
        stats.last_block_index = hg.last_block_index();
        stats.consensus_events = hg.consensus_events();
        stats.consensus_transactions = hg.consensus_transactions();
        stats.undetermined_events = hg.undetermined_events();
        stats.transaction_pool = self.core.transaction_pool_len();
        stats.num_peers = peers.len();
        stats.sync_rate = sync_rate;
        drop(stats);

        *self.shared.peers.write() = peers;
    }
}

/// Whether a peer whose last decided round is `theirs` is beyond the reach
/// of plain syncing from `ours`.
fn far_behind(ours: Option<u64>, theirs: Option<u64>) -> bool {
    match (ours, theirs) {
        (_, None) => false,
        (None, Some(theirs)) => theirs >= FRAME_DEPTH,
        (Some(ours), Some(theirs)) => theirs > ours.saturating_add(FRAME_DEPTH),
    }
}

async fn next_submission(rx: &mut Option<mpsc::Receiver<Vec<u8>>>) -> Option<Vec<u8>> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
