//! Network messages for the consensus protocol.

pub mod gossip;
pub mod request;
pub mod response;

// Re-export commonly used types
pub use gossip::{ProposalGossip, VoteGossip};
pub use request::GetBlocksRequest;
pub use response::GetBlocksResponse;
