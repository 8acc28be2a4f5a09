//! # HTTP Service
//!
//! Read-only observability endpoints over a running node.
//!
//! | Method | Path             | Description                            |
//! |--------|------------------|----------------------------------------|
//! | GET    | `/stats`         | [`NodeStats`] as JSON                  |
//! | GET    | `/block/:index`  | A committed block, hex-encoded         |
//! | GET    | `/peers`         | Current peer set (peers-file format)   |
//! | GET    | `/genesispeers`  | Genesis peer set (peers-file format)   |
//! | GET    | `/metrics`       | Prometheus text exposition             |

use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use huron_protocol::hashgraph::Block;
use huron_protocol::node::{NodeHandle, NodeStats};

use crate::metrics::NodeMetrics;

#[derive(Clone)]
pub struct ServiceState {
    pub node: NodeHandle,
    pub metrics: Arc<NodeMetrics>,
}

pub fn router(state: ServiceState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/stats", get(stats_handler))
        .route("/block/:index", get(block_handler))
        .route("/peers", get(peers_handler))
        .route("/genesispeers", get(genesis_peers_handler))
        .route("/metrics", get(metrics_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// JSON form of a [`Block`], with byte strings in hex.
#[derive(Debug, Serialize)]
pub struct BlockView {
    pub index: u64,
    pub round_received: u64,
    pub state_hash: String,
    pub frame_hash: String,
    pub peers_hash: String,
    pub transactions: Vec<String>,
    pub internal_transactions: Vec<InternalTransactionView>,
}

#[derive(Debug, Serialize)]
pub struct InternalTransactionView {
    pub kind: String,
    pub peer: String,
    pub accepted: Option<bool>,
}

impl From<&Block> for BlockView {
    fn from(block: &Block) -> Self {
        let internal_transactions = block
            .internal_transactions
            .iter()
            .map(|itx| InternalTransactionView {
                kind: format!("{:?}", itx.body.kind),
                peer: itx.body.peer.pub_key_hex(),
                accepted: block
                    .internal_transaction_receipts
                    .iter()
                    .find(|r| &r.internal_transaction == itx)
                    .map(|r| r.accepted),
            })
            .collect();
        Self {
            index: block.index,
            round_received: block.round_received,
            state_hash: hex::encode(block.state_hash),
            frame_hash: hex::encode(block.frame_hash),
            peers_hash: hex::encode(block.peers_hash),
            transactions: block.transactions.iter().map(hex::encode).collect(),
            internal_transactions,
        }
    }
}

async fn stats_handler(State(state): State<ServiceState>) -> Json<NodeStats> {
    Json(state.node.stats())
}

async fn block_handler(
    State(state): State<ServiceState>,
    Path(index): Path<u64>,
) -> impl IntoResponse {
    match state.node.block(index) {
        Ok(Some(block)) => Json(BlockView::from(&block)).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, format!("no block {index}")).into_response(),
        Err(e) => {
            tracing::error!(index, error = %e, "block lookup failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn peers_handler(State(state): State<ServiceState>) -> impl IntoResponse {
    Json(state.node.peers())
}

async fn genesis_peers_handler(State(state): State<ServiceState>) -> impl IntoResponse {
    Json(state.node.genesis_peers())
}

async fn metrics_handler(State(state): State<ServiceState>) -> impl IntoResponse {
    state.metrics.update(&state.node.stats());
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
