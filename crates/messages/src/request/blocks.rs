//! Block fetch request.

use braid_types::{Hash, NetworkMessage};
use sbor::prelude::BasicSbor;

/// Request to fetch blocks by hash.
///
/// Sent when a replica learns of a block (via a proposal's parent hashes or
/// a certificate reference) that is not yet in its storage. The responder
/// answers with the subset it has fetched.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct GetBlocksRequest {
    /// Hashes of the blocks being requested.
    pub blk_hashes: Vec<Hash>,
}

impl GetBlocksRequest {
    /// Create a new block fetch request.
    pub fn new(blk_hashes: Vec<Hash>) -> Self {
        Self { blk_hashes }
    }

    /// Number of blocks being requested.
    pub fn count(&self) -> usize {
        self.blk_hashes.len()
    }
}

impl NetworkMessage for GetBlocksRequest {
    fn message_type_id() -> &'static str {
        "consensus.blocks.request"
    }
}
