//! Outbound message envelope.

use braid_messages::{GetBlocksRequest, GetBlocksResponse, ProposalGossip, VoteGossip};

/// A message leaving this replica.
///
/// Wraps the concrete wire types so actions can carry "send this" without
/// the core knowing about transport framing.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// A block proposal (broadcast).
    Proposal(ProposalGossip),
    /// A vote (sent to the proposer).
    Vote(VoteGossip),
    /// A block fetch request.
    BlocksRequest(GetBlocksRequest),
    /// A block fetch response.
    BlocksResponse(GetBlocksResponse),
}

impl OutboundMessage {
    /// Get the message type name for telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            OutboundMessage::Proposal(_) => "Proposal",
            OutboundMessage::Vote(_) => "Vote",
            OutboundMessage::BlocksRequest(_) => "BlocksRequest",
            OutboundMessage::BlocksResponse(_) => "BlocksResponse",
        }
    }
}
