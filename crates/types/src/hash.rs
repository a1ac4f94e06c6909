//! Content-addressed hash primitive.

use sbor::prelude::BasicSbor;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors from parsing a hex-encoded hash.
#[derive(Debug, Error)]
pub enum HexError {
    #[error("invalid hex encoding: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("expected 32 bytes, got {0}")]
    WrongLength(usize),
}

/// 256-bit content identifier.
///
/// Produced by hashing the canonical (sbor) encoding of an entity. All
/// cross-references between blocks, commands and certificates are expressed
/// as `Hash` values and resolved through content-addressed storage.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BasicSbor)]
pub struct Hash([u8; 32]);

impl Hash {
    /// The all-zero hash.
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// Hash arbitrary bytes into a content identifier.
    pub fn from_bytes(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Hash(out)
    }

    /// Wrap raw digest bytes without hashing.
    pub const fn from_raw(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    /// Access the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, HexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(HexError::WrongLength(bytes.len()));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Hash(out))
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for Hash {
    /// Truncated hex form for logs (full form via `Display`).
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..", &hex::encode(self.0)[..10])
    }
}
