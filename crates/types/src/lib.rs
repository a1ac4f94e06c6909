//! Core types for Braid consensus.
//!
//! This crate provides the foundational types used throughout the consensus
//! implementation:
//!
//! - **Primitives**: Hash, cryptographic keys and signatures
//! - **Identifiers**: ReplicaId
//! - **Consensus types**: Block, Command, PartialCert, QuorumCert, Finality
//! - **Configuration**: the replica table and quorum size
//! - **Network traits**: message markers for serialization
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer. Wire types
//! carry only what goes on the network; per-replica bookkeeping (heights,
//! vote sets, delivery state) lives in the consensus crate's storage entries.

mod block;
mod config;
mod crypto;
mod finality;
mod hash;
mod identifiers;
mod network;
mod quorum_cert;

pub use block::{Block, Command};
pub use config::{ConsensusConfig, ReplicaInfo};
pub use crypto::{KeyPair, PartialCert, PublicKey, Signature};
pub use finality::Finality;
pub use hash::{Hash, HexError};
pub use identifiers::ReplicaId;
pub use network::NetworkMessage;
pub use quorum_cert::QuorumCert;

/// Test utilities.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;

    /// Create a deterministic keypair from a seed byte.
    pub fn test_keypair(seed: u8) -> KeyPair {
        KeyPair::from_seed(&[seed; 32])
    }

    /// Build a replica table of `n` replicas with deterministic keys.
    ///
    /// Replica `i` uses the keypair seeded with byte `i`. `nmajority` is left
    /// at zero; call `set_nmajority` (normally done by `on_init`) before
    /// quorum checks.
    pub fn test_config(n: u16) -> (ConsensusConfig, Vec<KeyPair>) {
        let mut config = ConsensusConfig::new();
        let mut keys = Vec::with_capacity(n as usize);
        for i in 0..n {
            let kp = test_keypair(i as u8);
            config.add_replica(ReplicaId(i), kp.public_key());
            keys.push(kp);
        }
        (config, keys)
    }

    /// Create a test command hash from a seed byte.
    pub fn test_cmd(seed: u8) -> Hash {
        Hash::from_bytes(&[b'c', b'm', b'd', seed])
    }
}
