//! # Hashing Utilities
//!
//! Two hash functions, each with a clear job:
//!
//! - **BLAKE3** is the content hash of everything the consensus layer
//!   addresses: events, frames, blocks, peer sets.
//! - **SHA-256** is used by the bundled dummy application to chain its
//!   state hash, matching what external apps commonly expect.

use sha2::{Digest, Sha256};

/// Compute the BLAKE3 hash of the input data.
///
/// # Example
///
/// ```
/// use huron_protocol::crypto::blake3_hash;
///
/// let hash = blake3_hash(b"huron");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Compute the SHA-256 hash of the input data as a fixed-size array.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let mut output = [0u8; 32];
    output.copy_from_slice(&hasher.finalize());
    output
}

/// `SHA-256(left || right)`.
///
/// The dummy app folds every committed transaction into its state with
/// this, so two replicas that applied the same transactions in the same
/// order end up with the same hash.
pub fn simple_hash_from_two_hashes(left: &[u8], right: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    let mut output = [0u8; 32];
    output.copy_from_slice(&hasher.finalize());
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blake3_is_deterministic() {
        assert_eq!(blake3_hash(b"a"), blake3_hash(b"a"));
        assert_ne!(blake3_hash(b"a"), blake3_hash(b"b"));
    }

    #[test]
    fn sha256_known_vector() {
        assert_eq!(
            hex::encode(sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn two_hash_chain_is_order_sensitive() {
        let a = sha256(b"tx1");
        let b = sha256(b"tx2");
        assert_ne!(
            simple_hash_from_two_hashes(&a, &b),
            simple_hash_from_two_hashes(&b, &a)
        );
    }
}
