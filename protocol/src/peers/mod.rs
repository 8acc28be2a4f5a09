//! # Peers
//!
//! Validator identities, versioned validator sets, and the JSON files that
//! seed them.

pub mod json;
pub mod peer;
pub mod peer_set;

pub use json::{load_peer_sets, JsonPeerSet};
pub use peer::{peer_id, Peer, PeerId, PeerRecord};
pub use peer_set::PeerSet;

/// Errors from loading or parsing peers.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed peers file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("no peers.json or peers.genesis.json in {0}")]
    Missing(String),
}
