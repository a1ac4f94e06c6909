//! Proposal gossip message.

use braid_types::{Block, Hash, NetworkMessage, ReplicaId};
use sbor::prelude::BasicSbor;

/// Broadcasts a newly proposed block to all replicas.
///
/// Carries the full wire form of the block. Receivers resolve missing
/// ancestors through the block fetch protocol before the proposal reaches
/// the safety core.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ProposalGossip {
    /// The proposing replica.
    pub proposer: ReplicaId,
    /// The proposed block.
    pub block: Block,
}

impl ProposalGossip {
    /// Create a new proposal gossip message.
    pub fn new(proposer: ReplicaId, block: Block) -> Self {
        Self { proposer, block }
    }

    /// Content address of the proposed block.
    pub fn block_hash(&self) -> Hash {
        self.block.hash()
    }
}

impl NetworkMessage for ProposalGossip {
    fn message_type_id() -> &'static str {
        "consensus.proposal"
    }
}
