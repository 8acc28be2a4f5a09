//! A single validator as the rest of the network sees it.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::PeerError;
use crate::crypto::{blake3_hash, PublicKey};

/// Compact numeric peer identifier.
///
/// Derived from the public key, so every node computes the same id for the
/// same peer without coordination. Used as the key of every per-peer map in
/// the hashgraph (last ancestors, first descendants, known-event digests).
pub type PeerId = u32;

/// Derive the [`PeerId`] of a public key: the first four bytes of its
/// BLAKE3 digest, big-endian.
pub fn peer_id(key: &PublicKey) -> PeerId {
    let digest = blake3_hash(key.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// A validator: network address, public key, moniker.
///
/// On disk and on the wire a peer is the `{"NetAddr","PubKeyHex","Moniker"}`
/// record used by `peers.json`; the id is recomputed on load.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PeerRecord", into = "PeerRecord")]
pub struct Peer {
    id: PeerId,
    pub net_addr: String,
    pub pub_key: PublicKey,
    pub moniker: String,
}

impl Peer {
    pub fn new(pub_key: PublicKey, net_addr: impl Into<String>, moniker: impl Into<String>) -> Self {
        Self {
            id: peer_id(&pub_key),
            net_addr: net_addr.into(),
            pub_key,
            moniker: moniker.into(),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Force an id, as two keys whose digests share a prefix would.
    #[cfg(test)]
    pub(crate) fn with_id(mut self, id: PeerId) -> Self {
        self.id = id;
        self
    }

    /// Upper-case `0X`-prefixed hex, the format peers files are written in.
    pub fn pub_key_hex(&self) -> String {
        format!("0X{}", self.pub_key.to_hex().to_uppercase())
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Peer({} {} @ {})", self.id, self.moniker, self.net_addr)
    }
}

/// Serialized form of a [`Peer`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerRecord {
    #[serde(rename = "NetAddr")]
    pub net_addr: String,
    #[serde(rename = "PubKeyHex")]
    pub pub_key_hex: String,
    #[serde(rename = "Moniker", default)]
    pub moniker: String,
}

impl TryFrom<PeerRecord> for Peer {
    type Error = PeerError;

    fn try_from(record: PeerRecord) -> Result<Self, Self::Error> {
        let hex = record
            .pub_key_hex
            .trim()
            .trim_start_matches("0x")
            .trim_start_matches("0X")
            .to_lowercase();
        let pub_key = PublicKey::from_hex(&hex)
            .map_err(|_| PeerError::InvalidPublicKey(record.pub_key_hex.clone()))?;
        Ok(Peer::new(pub_key, record.net_addr, record.moniker))
    }
}

impl From<Peer> for PeerRecord {
    fn from(peer: Peer) -> Self {
        PeerRecord {
            pub_key_hex: peer.pub_key_hex(),
            net_addr: peer.net_addr,
            moniker: peer.moniker,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    #[test]
    fn id_is_stable_across_serialization() {
        let kp = Keypair::from_seed(&[1u8; 32]);
        let peer = Peer::new(kp.public_key(), "127.0.0.1:1337", "alice");
        let json = serde_json::to_string(&peer).unwrap();
        assert!(json.contains("\"PubKeyHex\":\"0X"));
        let back: Peer = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id(), peer.id());
        assert_eq!(back, peer);
    }

    #[test]
    fn lowercase_and_unprefixed_hex_accepted() {
        let kp = Keypair::from_seed(&[2u8; 32]);
        let json = format!(
            r#"{{"NetAddr":"a:1","PubKeyHex":"{}"}}"#,
            kp.public_key().to_hex()
        );
        let peer: Peer = serde_json::from_str(&json).unwrap();
        assert_eq!(peer.id(), peer_id(&kp.public_key()));
        assert_eq!(peer.moniker, "");
    }

    #[test]
    fn invalid_key_rejected() {
        let json = r#"{"NetAddr":"a:1","PubKeyHex":"0XDEADBEEF","Moniker":"x"}"#;
        assert!(serde_json::from_str::<Peer>(json).is_err());
    }
}
