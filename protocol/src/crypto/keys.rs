//! # Key Management
//!
//! Ed25519 keypairs for huron validators.
//!
//! Every validator signs the events it creates, and every joining or
//! departing peer signs the membership transaction that announces it. The
//! public half doubles as the peer's identity: [`PeerId`](crate::peers::PeerId)
//! is derived from it, and it is what appears in `peers.json`.
//!
//! ## Security considerations
//!
//! - Private keys are zeroized on drop (thanks, ed25519-dalek).
//! - Key generation uses `OsRng`.
//! - Key bytes are never logged. `Debug` prints the public key only.

use ed25519_dalek::{
    Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey, SECRET_KEY_LENGTH,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur during key operations.
///
/// Deliberately vague about *why* something failed. Error messages are a
/// poor place to leak details about key material.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes: wrong length or malformed hex")]
    InvalidSecretKey,

    #[error("invalid public key bytes: not a valid Ed25519 point")]
    InvalidPublicKey,
}

/// A validator's signing keypair.
///
/// `Keypair` intentionally does NOT implement `Serialize`. Writing a private
/// key somewhere should be a deliberate act; use [`to_hex`](Self::to_hex).
///
/// # Examples
///
/// ```
/// use huron_protocol::crypto::keys::Keypair;
///
/// let kp = Keypair::generate();
/// let sig = kp.sign(b"event hash");
/// assert!(kp.public_key().verify(b"event hash", &sig));
/// ```
pub struct Keypair {
    signing_key: SigningKey,
}

/// The public half of a validator identity.
///
/// Ordered and hashable so it can key maps and sort peer sets. Ordering is
/// byte-wise, which is what the peer set canonical order relies on.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PublicKey {
    bytes: [u8; 32],
}

/// An Ed25519 signature. Always 64 bytes when produced by [`Keypair::sign`];
/// anything else simply fails verification.
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Signature {
    bytes: Vec<u8>,
}

impl Keypair {
    /// Generate a fresh keypair using the OS cryptographic RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Build a keypair deterministically from a 32-byte seed.
    ///
    /// Handy for tests and simulations where every run must produce the same
    /// peer ids. A weak seed gives a weak key.
    pub fn from_seed(seed: &[u8; SECRET_KEY_LENGTH]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Parse a hex-encoded secret key, as stored in the `priv_key` file.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| KeyError::InvalidSecretKey)?;
        let arr: [u8; SECRET_KEY_LENGTH] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_seed(&arr))
    }

    /// Hex-encode the secret key. **Handle with care.**
    pub fn to_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Returns the public key associated with this keypair.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            bytes: self.signing_key.verifying_key().to_bytes(),
        }
    }

    /// Sign a message. Ed25519 is deterministic, so the same (key, message)
    /// pair always yields the same signature. The coin rounds of virtual
    /// voting depend on exactly that.
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature {
            bytes: self.signing_key.sign(message).to_bytes().to_vec(),
        }
    }
}

impl Clone for Keypair {
    fn clone(&self) -> Self {
        Self::from_seed(&self.signing_key.to_bytes())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair(pub={})", self.public_key().to_hex())
    }
}

// ---------------------------------------------------------------------------
// PublicKey
// ---------------------------------------------------------------------------

impl PublicKey {
    /// Wrap raw bytes without curve validation. Verification will reject
    /// anything that is not a valid point.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Parse a hex public key and check that it is a valid Ed25519 point.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let raw = hex::decode(s.trim()).map_err(|_| KeyError::InvalidPublicKey)?;
        let bytes: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidPublicKey)?;
        VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self { bytes })
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Verify a signature against this public key.
    ///
    /// Returns a plain boolean: callers only ever need yes/no, and a malformed
    /// key or signature is just another "no".
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.bytes) else {
            return false;
        };
        let Ok(sig_bytes) = <[u8; 64]>::try_from(signature.bytes.as_slice()) else {
            return false;
        };
        verifying_key
            .verify(message, &DalekSignature::from_bytes(&sig_bytes))
            .is_ok()
    }

    /// Hex-encoded representation, 64 characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", &self.to_hex()[..16])
    }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

impl Signature {
    /// Create a signature from its raw 64-byte representation.
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    /// Returns the raw signature bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The bit in the middle of the signature.
    ///
    /// Used as the coin flip in coin rounds. Nobody can predict it before the
    /// event is signed, and everybody derives the same value afterwards.
    pub fn middle_bit(&self) -> bool {
        if self.bytes.is_empty() {
            return false;
        }
        let byte = self.bytes[self.bytes.len() / 2];
        byte & 0x80 != 0
    }

    /// Hex-encoded signature, 128 characters for a valid one.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "Signature({})", &hex[..hex.len().min(16)])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let kp = Keypair::generate();
        let sig = kp.sign(b"hello huron");
        assert!(kp.public_key().verify(b"hello huron", &sig));
        assert!(!kp.public_key().verify(b"hello huron!", &sig));
        assert!(!kp.public_key().verify(b"jello huron", &sig));
    }

    #[test]
    fn wrong_key_rejects() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let sig = a.sign(b"msg");
        assert!(!b.public_key().verify(b"msg", &sig));
    }

    #[test]
    fn secret_hex_roundtrip_preserves_identity() {
        let kp = Keypair::generate();
        let restored = Keypair::from_hex(&kp.to_hex()).expect("valid hex");
        assert_eq!(kp.public_key(), restored.public_key());
    }

    #[test]
    fn from_hex_rejects_garbage() {
        assert!(Keypair::from_hex("not hex").is_err());
        assert!(Keypair::from_hex("abcd").is_err());
        assert!(PublicKey::from_hex("00").is_err());
    }

    #[test]
    fn seeded_keys_are_deterministic() {
        let a = Keypair::from_seed(&[7u8; 32]);
        let b = Keypair::from_seed(&[7u8; 32]);
        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(a.sign(b"x"), b.sign(b"x"));
    }

    #[test]
    fn malformed_signature_fails_closed() {
        let kp = Keypair::generate();
        let bogus = Signature::default();
        assert!(!kp.public_key().verify(b"msg", &bogus));
        assert!(!bogus.middle_bit());
    }

    #[test]
    fn debug_never_prints_secret() {
        let kp = Keypair::generate();
        let dbg = format!("{:?}", kp);
        assert!(!dbg.contains(&kp.to_hex()));
    }
}
