//! Vote message.

use braid_types::{Hash, NetworkMessage, PartialCert, ReplicaId};
use sbor::prelude::BasicSbor;

/// A replica's vote for a block, sent to the block's proposer.
///
/// Sender identity comes from `voter`, backed by the partial certificate's
/// signature; votes with a mismatched or invalid certificate are dropped
/// after verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub struct VoteGossip {
    /// The voting replica.
    pub voter: ReplicaId,
    /// Hash of the block being voted for.
    pub blk_hash: Hash,
    /// Signature over the block hash.
    pub cert: PartialCert,
}

impl VoteGossip {
    /// Create a vote from a freshly signed partial certificate.
    pub fn new(voter: ReplicaId, blk_hash: Hash, cert: PartialCert) -> Self {
        Self {
            voter,
            blk_hash,
            cert,
        }
    }

    /// Whether the embedded certificate is internally consistent with the
    /// vote envelope (same voter, same block).
    pub fn is_consistent(&self) -> bool {
        self.cert.replica == self.voter && self.cert.obj_hash == self.blk_hash
    }
}

impl NetworkMessage for VoteGossip {
    fn message_type_id() -> &'static str {
        "consensus.vote"
    }
}
