//! Signing facade.
//!
//! Wraps the Ed25519 primitives behind the small surface the consensus core
//! needs: per-replica signing, and verification of individual partial
//! certificates. Aggregation over partial certificates lives in
//! [`crate::QuorumCert`].

use crate::{Hash, ReplicaId};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use sbor::prelude::BasicSbor;

/// A replica's signing keypair.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    /// Derive a keypair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(seed),
        }
    }

    /// The public half of this keypair.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing.verifying_key().to_bytes())
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing.sign(message).to_bytes())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Ed25519 public key bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BasicSbor)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    /// Verify a signature over a message.
    ///
    /// Returns `false` for malformed keys as well as invalid signatures; a
    /// peer that registered garbage key bytes simply never verifies.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        key.verify(message, &sig).is_ok()
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pk:{}..", &hex::encode(self.0)[..10])
    }
}

/// Ed25519 signature bytes.
#[derive(Clone, Copy, PartialEq, Eq, BasicSbor)]
pub struct Signature(pub [u8; 64]);

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sig:{}..", &hex::encode(self.0)[..10])
    }
}

/// A single replica's signature over a block hash.
///
/// `nmajority` distinct partial certificates over the same hash aggregate
/// into a [`crate::QuorumCert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub struct PartialCert {
    /// The signing replica.
    pub replica: ReplicaId,
    /// The block hash being certified.
    pub obj_hash: Hash,
    /// Signature over the block hash.
    pub sig: Signature,
}

impl PartialCert {
    /// Create a partial certificate by signing `obj_hash`.
    pub fn create(keypair: &KeyPair, replica: ReplicaId, obj_hash: Hash) -> Self {
        Self {
            replica,
            obj_hash,
            sig: keypair.sign(obj_hash.as_bytes()),
        }
    }

    /// Verify this certificate against the signer's public key.
    pub fn verify(&self, public_key: &PublicKey) -> bool {
        public_key.verify(self.obj_hash.as_bytes(), &self.sig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_round_trip() {
        let kp = KeyPair::from_seed(&[7u8; 32]);
        let sig = kp.sign(b"message");
        assert!(kp.public_key().verify(b"message", &sig));
        assert!(!kp.public_key().verify(b"other message", &sig));
    }

    #[test]
    fn test_part_cert_rejects_wrong_key() {
        let kp = KeyPair::from_seed(&[1u8; 32]);
        let other = KeyPair::from_seed(&[2u8; 32]);
        let cert = PartialCert::create(&kp, ReplicaId(0), Hash::from_bytes(b"blk"));
        assert!(cert.verify(&kp.public_key()));
        assert!(!cert.verify(&other.public_key()));
    }
}
