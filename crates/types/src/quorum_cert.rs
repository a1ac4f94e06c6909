//! Quorum certificates.

use crate::{ConsensusConfig, Hash, ReplicaId, Signature};
use sbor::prelude::BasicSbor;
use std::collections::BTreeMap;

/// An aggregate of partial signatures over a block hash.
///
/// Starts life as an empty accumulator created by a proposer (or lazily by a
/// replica that receives votes for a block it did not propose). Parts are
/// added one per voter; once `nmajority` distinct parts are present the
/// accumulator is finalized with [`QuorumCert::compute`] and becomes a
/// transferable proof that a quorum voted for the block.
///
/// Parts are keyed by replica in a `BTreeMap` so the wire encoding is
/// canonical regardless of vote arrival order.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct QuorumCert {
    obj_hash: Hash,
    parts: BTreeMap<ReplicaId, Signature>,
    finalized: bool,
}

impl QuorumCert {
    /// Create an empty accumulator over `obj_hash`.
    pub fn new(obj_hash: Hash) -> Self {
        Self {
            obj_hash,
            parts: BTreeMap::new(),
            finalized: false,
        }
    }

    /// The block hash this certificate covers.
    pub fn obj_hash(&self) -> Hash {
        self.obj_hash
    }

    /// Add one replica's signature to the accumulator.
    ///
    /// Re-adding the same replica overwrites its previous part; adding after
    /// finalization is ignored (the certificate is already complete).
    pub fn add_part(&mut self, replica: ReplicaId, sig: Signature) {
        if self.finalized {
            return;
        }
        self.parts.insert(replica, sig);
    }

    /// Finalize the accumulator into a complete certificate.
    pub fn compute(&mut self) {
        self.finalized = true;
    }

    /// Whether [`QuorumCert::compute`] has run.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Number of distinct parts accumulated so far.
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// Verify this certificate against a configuration.
    ///
    /// A valid certificate is finalized, carries at least `nmajority` parts,
    /// and every part is a valid signature over `obj_hash` by the claimed
    /// replica's registered key.
    pub fn verify(&self, config: &ConsensusConfig) -> bool {
        if !self.finalized || self.parts.len() < config.nmajority() {
            return false;
        }
        self.parts.iter().all(|(replica, sig)| {
            config
                .public_key(*replica)
                .is_some_and(|pk| pk.verify(self.obj_hash.as_bytes(), sig))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_config;
    use crate::PartialCert;

    fn signed_qc(hash: Hash, voters: &[u16]) -> (QuorumCert, ConsensusConfig) {
        let (mut config, keys) = test_config(4);
        config.set_nmajority(3);
        let mut qc = QuorumCert::new(hash);
        for &v in voters {
            let cert = PartialCert::create(&keys[v as usize], ReplicaId(v), hash);
            qc.add_part(ReplicaId(v), cert.sig);
        }
        (qc, config)
    }

    #[test]
    fn test_verify_requires_finalization() {
        let hash = Hash::from_bytes(b"blk");
        let (mut qc, config) = signed_qc(hash, &[0, 1, 2]);
        assert!(!qc.verify(&config));
        qc.compute();
        assert!(qc.verify(&config));
    }

    #[test]
    fn test_verify_requires_quorum() {
        let hash = Hash::from_bytes(b"blk");
        let (mut qc, config) = signed_qc(hash, &[0, 1]);
        qc.compute();
        assert!(!qc.verify(&config));
    }

    #[test]
    fn test_verify_rejects_forged_part() {
        let hash = Hash::from_bytes(b"blk");
        let (mut qc, config) = signed_qc(hash, &[0, 1]);
        // A signature from replica 3's key claimed as replica 2's part.
        let (_, keys) = test_config(4);
        let forged = PartialCert::create(&keys[3], ReplicaId(2), hash);
        qc.add_part(ReplicaId(2), forged.sig);
        qc.compute();
        assert!(!qc.verify(&config));
    }

    #[test]
    fn test_add_part_after_compute_is_ignored() {
        let hash = Hash::from_bytes(b"blk");
        let (mut qc, _) = signed_qc(hash, &[0, 1, 2]);
        qc.compute();
        let before = qc.part_count();
        qc.add_part(ReplicaId(3), Signature([0u8; 64]));
        assert_eq!(qc.part_count(), before);
    }
}
