//! Fetch requests.

mod blocks;

pub use blocks::GetBlocksRequest;
