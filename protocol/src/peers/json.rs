//! `peers.json` and `peers.genesis.json`.
//!
//! Both files hold a JSON array of peer records. The genesis file pins the
//! validator set of round 0; the current file is what an operator edits to
//! point a new node at an existing network. Either one may be missing, in
//! which case the other stands in for it.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{Peer, PeerError, PeerSet};
use crate::config::{GENESIS_PEERS_FILE, PEERS_FILE};

/// A peers file on disk.
#[derive(Debug, Clone)]
pub struct JsonPeerSet {
    path: PathBuf,
}

impl JsonPeerSet {
    pub fn new(dir: impl AsRef<Path>, file_name: &str) -> Self {
        Self {
            path: dir.as_ref().join(file_name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read and parse the file.
    pub fn read(&self) -> Result<Vec<Peer>, PeerError> {
        let raw = fs::read_to_string(&self.path).map_err(|e| PeerError::Io {
            path: self.path.display().to_string(),
            source: e,
        })?;
        let peers: Vec<Peer> = serde_json::from_str(&raw)?;
        debug!(path = %self.path.display(), peers = peers.len(), "peers file loaded");
        Ok(peers)
    }

    /// Write `peers` as pretty-printed JSON, replacing the file.
    pub fn write(&self, peers: &[Peer]) -> Result<(), PeerError> {
        let raw = serde_json::to_string_pretty(peers)?;
        fs::write(&self.path, raw).map_err(|e| PeerError::Io {
            path: self.path.display().to_string(),
            source: e,
        })
    }
}

/// Load `(genesis, current)` peer sets from a data directory.
///
/// A missing genesis file falls back to the current file and vice versa.
/// Having neither is an error: a node cannot guess its network.
pub fn load_peer_sets(dir: impl AsRef<Path>) -> Result<(PeerSet, PeerSet), PeerError> {
    let current = JsonPeerSet::new(&dir, PEERS_FILE);
    let genesis = JsonPeerSet::new(&dir, GENESIS_PEERS_FILE);

    let (genesis_peers, current_peers) = match (genesis.exists(), current.exists()) {
        (true, true) => (genesis.read()?, current.read()?),
        (false, true) => {
            info!("no genesis peers file, using current peers as genesis");
            let peers = current.read()?;
            (peers.clone(), peers)
        }
        (true, false) => {
            info!("no current peers file, using genesis peers");
            let peers = genesis.read()?;
            (peers.clone(), peers)
        }
        (false, false) => {
            return Err(PeerError::Missing(dir.as_ref().display().to_string()));
        }
    };

    Ok((PeerSet::new(genesis_peers), PeerSet::new(current_peers)))
}
