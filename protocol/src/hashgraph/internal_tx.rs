//! Membership transactions.
//!
//! A node that wants to join signs a `PeerAdd` naming itself; a node that
//! wants to leave signs a `PeerRemove` naming itself. These ride inside
//! events like ordinary transactions, reach consensus in a block, and the
//! application decides whether to accept them. Accepted ones produce the
//! next [`PeerSet`](crate::peers::PeerSet) version.

use serde::{Deserialize, Serialize};

use crate::crypto::{Keypair, Signature};
use crate::peers::Peer;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    PeerAdd,
    PeerRemove,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalTransactionBody {
    pub kind: TransactionType,
    pub peer: Peer,
}

/// A membership change, signed by the peer it concerns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalTransaction {
    pub body: InternalTransactionBody,
    pub signature: Signature,
}

impl InternalTransaction {
    pub fn new(kind: TransactionType, peer: Peer) -> Self {
        Self {
            body: InternalTransactionBody { kind, peer },
            signature: Signature::default(),
        }
    }

    /// Build and sign in one go. The keypair must belong to `peer`.
    pub fn signed(kind: TransactionType, peer: Peer, keypair: &Keypair) -> Self {
        let mut itx = Self::new(kind, peer);
        itx.sign(keypair);
        itx
    }

    pub fn sign(&mut self, keypair: &Keypair) {
        self.signature = keypair.sign(&self.hash());
    }

    /// The subject peer must have signed the transaction.
    pub fn verify(&self) -> bool {
        self.body.peer.pub_key.verify(&self.hash(), &self.signature)
    }

    /// BLAKE3 over kind, public key, address and moniker.
    pub fn hash(&self) -> [u8; 32] {
        let peer = &self.body.peer;
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[match self.body.kind {
            TransactionType::PeerAdd => 0,
            TransactionType::PeerRemove => 1,
        }]);
        hasher.update(peer.pub_key.as_bytes());
        hasher.update(&(peer.net_addr.len() as u64).to_le_bytes());
        hasher.update(peer.net_addr.as_bytes());
        hasher.update(&(peer.moniker.len() as u64).to_le_bytes());
        hasher.update(peer.moniker.as_bytes());
        *hasher.finalize().as_bytes()
    }

    pub fn as_accepted(&self) -> InternalTransactionReceipt {
        InternalTransactionReceipt {
            internal_transaction: self.clone(),
            accepted: true,
        }
    }

    pub fn as_refused(&self) -> InternalTransactionReceipt {
        InternalTransactionReceipt {
            internal_transaction: self.clone(),
            accepted: false,
        }
    }
}

/// The application's verdict on a membership transaction, filled in when
/// the containing block is committed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalTransactionReceipt {
    pub internal_transaction: InternalTransaction,
    pub accepted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(kp: &Keypair) -> Peer {
        Peer::new(kp.public_key(), "127.0.0.1:1400", "joiner")
    }

    #[test]
    fn self_signed_transaction_verifies() {
        let kp = Keypair::generate();
        let itx = InternalTransaction::signed(TransactionType::PeerAdd, peer(&kp), &kp);
        assert!(itx.verify());
    }

    #[test]
    fn signature_by_someone_else_rejected() {
        let subject = Keypair::generate();
        let impostor = Keypair::generate();
        let itx = InternalTransaction::signed(TransactionType::PeerAdd, peer(&subject), &impostor);
        assert!(!itx.verify());
    }

    #[test]
    fn kind_is_part_of_the_hash() {
        let kp = Keypair::generate();
        let add = InternalTransaction::new(TransactionType::PeerAdd, peer(&kp));
        let remove = InternalTransaction::new(TransactionType::PeerRemove, peer(&kp));
        assert_ne!(add.hash(), remove.hash());
    }

    #[test]
    fn receipts_carry_verdict() {
        let kp = Keypair::generate();
        let itx = InternalTransaction::signed(TransactionType::PeerRemove, peer(&kp), &kp);
        assert!(itx.as_accepted().accepted);
        assert!(!itx.as_refused().accepted);
        assert_eq!(itx.as_refused().internal_transaction, itx);
    }
}
