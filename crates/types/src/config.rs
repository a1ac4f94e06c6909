//! Replica configuration.

use crate::{PublicKey, ReplicaId};
use std::collections::BTreeMap;

/// Public information about one replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaInfo {
    /// The replica's identifier.
    pub id: ReplicaId,
    /// Key used to verify the replica's votes and certificates.
    pub public_key: PublicKey,
}

/// The replica table and quorum size for one configuration.
///
/// Fixed for the lifetime of the process; runtime reconfiguration is not
/// supported. `nmajority` is installed by the core's `on_init` as
/// `2 * nfaulty + 1`.
#[derive(Debug, Clone, Default)]
pub struct ConsensusConfig {
    replicas: BTreeMap<ReplicaId, ReplicaInfo>,
    nmajority: usize,
}

impl ConsensusConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a replica and its verification key.
    pub fn add_replica(&mut self, id: ReplicaId, public_key: PublicKey) {
        self.replicas.insert(id, ReplicaInfo { id, public_key });
    }

    /// Look up a replica's entry.
    pub fn replica(&self, id: ReplicaId) -> Option<&ReplicaInfo> {
        self.replicas.get(&id)
    }

    /// Look up a replica's verification key.
    pub fn public_key(&self, id: ReplicaId) -> Option<&PublicKey> {
        self.replicas.get(&id).map(|info| &info.public_key)
    }

    /// Iterate over all registered replica ids.
    pub fn replica_ids(&self) -> impl Iterator<Item = ReplicaId> + '_ {
        self.replicas.keys().copied()
    }

    /// Number of registered replicas.
    pub fn num_replicas(&self) -> usize {
        self.replicas.len()
    }

    /// Quorum size (`2f + 1`).
    pub fn nmajority(&self) -> usize {
        self.nmajority
    }

    /// Install the quorum size. Called by the core's `on_init`.
    pub fn set_nmajority(&mut self, nmajority: usize) {
        self.nmajority = nmajority;
    }
}
