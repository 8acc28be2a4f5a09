//! # Cryptographic Primitives
//!
//! Thin, type-safe wrappers around audited implementations: Ed25519 for
//! signatures, BLAKE3 for content addressing, SHA-256 for the application
//! state chain.

pub mod hash;
pub mod keys;

pub use hash::{blake3_hash, sha256, simple_hash_from_two_hashes};
pub use keys::{KeyError, Keypair, PublicKey, Signature};
