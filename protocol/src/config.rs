//! # Protocol Configuration & Constants
//!
//! Every tunable of a huron node lives here. The consensus-relevant ones
//! (`coin_round_frequency`, `membership_anchor_offset`) must be identical
//! on every node of a network. The rest are local performance knobs.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Protocol version string, reported by `huron-node version` and `/stats`.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// File Layout
// ---------------------------------------------------------------------------

/// Hex-encoded validator secret key inside the data directory.
pub const KEY_FILE: &str = "priv_key";

/// Current peer set file.
pub const PEERS_FILE: &str = "peers.json";

/// Genesis peer set file.
pub const GENESIS_PEERS_FILE: &str = "peers.genesis.json";

/// Directory of the persistent store inside the data directory.
pub const DB_DIR: &str = "db";

// ---------------------------------------------------------------------------
// Consensus Parameters
// ---------------------------------------------------------------------------

/// Every n-th voting round is a coin round. Values below 2 are raised to 2.
pub const DEFAULT_COIN_ROUND_FREQUENCY: u64 = 4;

/// A membership change accepted in a block with round-received `r` becomes
/// active at round `r + offset`.
pub const DEFAULT_MEMBERSHIP_ANCHOR_OFFSET: u64 = 6;

/// How many rounds of consensus events a frame carries below its own
/// round. Nodes that fast-forward from a frame can compute exact rounds for
/// any later event whose parents are at most this many rounds old.
pub const FRAME_DEPTH: u64 = 3;

// ---------------------------------------------------------------------------
// Networking
// ---------------------------------------------------------------------------

/// Upper bound on a single TCP frame, in either direction.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Capacity of the RPC consumer and submit channels.
pub const CHANNEL_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// NodeConfig
// ---------------------------------------------------------------------------

/// Runtime configuration of a node.
///
/// Serialized with durations as milliseconds so it reads naturally in
/// `huron.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Gossip interval while there is pending work.
    #[serde(with = "duration_ms")]
    pub heartbeat: Duration,

    /// Gossip interval while idle.
    #[serde(with = "duration_ms")]
    pub slow_heartbeat: Duration,

    /// Bound on any single RPC round trip.
    #[serde(with = "duration_ms")]
    pub tcp_timeout: Duration,

    /// Bound on the join handshake and on waiting for a leave to commit.
    #[serde(with = "duration_ms")]
    pub join_timeout: Duration,

    /// Delay between attempts to commit a block the application rejected.
    #[serde(with = "duration_ms")]
    pub commit_retry_delay: Duration,

    /// Capacity of each LRU cache in front of the persistent store.
    pub cache_size: usize,

    /// Maximum number of events sent in one sync response.
    pub sync_limit: usize,

    /// Fall back to snapshot catch-up when a sync reveals we are too far
    /// behind.
    pub enable_fast_sync: bool,

    /// Maximum concurrent sync workers, and connections kept per peer.
    pub max_pool: usize,

    /// Replay the persistent store on start instead of starting fresh.
    pub bootstrap: bool,

    /// See [`DEFAULT_COIN_ROUND_FREQUENCY`].
    pub coin_round_frequency: u64,

    /// See [`DEFAULT_MEMBERSHIP_ANCHOR_OFFSET`].
    pub membership_anchor_offset: u64,

    /// Human-readable name of this node. Taken from the peers file when
    /// empty.
    pub moniker: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_millis(10),
            slow_heartbeat: Duration::from_millis(1000),
            tcp_timeout: Duration::from_millis(1000),
            join_timeout: Duration::from_millis(10_000),
            commit_retry_delay: Duration::from_millis(500),
            cache_size: 10_000,
            sync_limit: 1000,
            enable_fast_sync: false,
            max_pool: 2,
            bootstrap: false,
            coin_round_frequency: DEFAULT_COIN_ROUND_FREQUENCY,
            membership_anchor_offset: DEFAULT_MEMBERSHIP_ANCHOR_OFFSET,
            moniker: String::new(),
        }
    }
}

impl NodeConfig {
    /// A configuration tuned for in-process tests: fast heartbeats, short
    /// timeouts.
    pub fn test_config() -> Self {
        Self {
            heartbeat: Duration::from_millis(5),
            slow_heartbeat: Duration::from_millis(50),
            tcp_timeout: Duration::from_millis(500),
            join_timeout: Duration::from_millis(5_000),
            commit_retry_delay: Duration::from_millis(10),
            ..Self::default()
        }
    }
}

/// Serde adapter storing a `Duration` as integer milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = NodeConfig::default();
        assert!(c.heartbeat < c.slow_heartbeat);
        assert!(c.coin_round_frequency >= 2);
        assert!(c.max_pool >= 1);
        assert!(c.sync_limit > 0);
    }

    #[test]
    fn json_uses_millis() {
        let c = NodeConfig::default();
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["heartbeat"], 10);
        assert_eq!(v["join_timeout"], 10_000);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let c: NodeConfig = serde_json::from_str(r#"{"sync_limit": 5}"#).unwrap();
        assert_eq!(c.sync_limit, 5);
        assert_eq!(c.max_pool, NodeConfig::default().max_pool);
    }
}
