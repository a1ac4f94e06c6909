//! Block fetch response.

use braid_types::{Block, NetworkMessage};
use sbor::prelude::BasicSbor;

/// Response to a [`crate::GetBlocksRequest`].
///
/// Contains the wire form of every requested block the responder had
/// fetched; requested hashes the responder does not know are silently
/// omitted and the requester retries elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct GetBlocksResponse {
    /// The returned blocks.
    pub blocks: Vec<Block>,
}

impl GetBlocksResponse {
    /// Create a new block fetch response.
    pub fn new(blocks: Vec<Block>) -> Self {
        Self { blocks }
    }

    /// Consume and return the inner blocks.
    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }
}

impl NetworkMessage for GetBlocksResponse {
    fn message_type_id() -> &'static str {
        "consensus.blocks.response"
    }
}
