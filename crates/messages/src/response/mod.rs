//! Fetch responses.

mod blocks;

pub use blocks::GetBlocksResponse;
