//! Gossip messages: proposals and votes.

mod proposal;
mod vote;

pub use proposal::ProposalGossip;
pub use vote::VoteGossip;
