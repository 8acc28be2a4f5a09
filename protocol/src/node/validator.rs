//! The local validator identity.

use crate::crypto::{Keypair, PublicKey};
use crate::hashgraph::{InternalTransaction, TransactionType};
use crate::peers::{peer_id, Peer, PeerId};

#[derive(Clone, Debug)]
pub struct Validator {
    keypair: Keypair,
    moniker: String,
    id: PeerId,
}

impl Validator {
    pub fn new(keypair: Keypair, moniker: impl Into<String>) -> Self {
        let id = peer_id(&keypair.public_key());
        Self {
            keypair,
            moniker: moniker.into(),
            id,
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn moniker(&self) -> &str {
        &self.moniker
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// This validator as a peer reachable at `net_addr`.
    pub fn as_peer(&self, net_addr: impl Into<String>) -> Peer {
        Peer::new(self.public_key(), net_addr, self.moniker.clone())
    }

    /// A signed membership request concerning this validator.
    pub fn membership_request(&self, kind: TransactionType, net_addr: &str) -> InternalTransaction {
        InternalTransaction::signed(kind, self.as_peer(net_addr), &self.keypair)
    }
}
