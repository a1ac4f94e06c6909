//! Wire framing.
//!
//! Every message is wrapped in a [`WireMessage`] envelope and sbor-encoded.
//! The enum discriminant doubles as the opcode; transports only ever see
//! opaque byte frames.

use braid_core::{Event, OutboundMessage};
use braid_messages::{GetBlocksRequest, GetBlocksResponse, ProposalGossip, VoteGossip};
use braid_types::ReplicaId;
use sbor::prelude::{basic_decode, basic_encode, BasicSbor};
use thiserror::Error;

/// Errors from wire decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed wire frame: {0}")]
    Malformed(String),
}

/// The envelope for every inter-replica message.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub enum WireMessage {
    /// A block proposal.
    Propose(ProposalGossip),
    /// A vote.
    Vote(VoteGossip),
    /// A block fetch request.
    ReqBlocks(GetBlocksRequest),
    /// A block fetch response.
    RespBlocks(GetBlocksResponse),
}

/// Encode an outbound message into a wire frame.
pub fn encode(message: &OutboundMessage) -> Vec<u8> {
    let wire = match message {
        OutboundMessage::Proposal(prop) => WireMessage::Propose(prop.clone()),
        OutboundMessage::Vote(vote) => WireMessage::Vote(*vote),
        OutboundMessage::BlocksRequest(req) => WireMessage::ReqBlocks(req.clone()),
        OutboundMessage::BlocksResponse(resp) => WireMessage::RespBlocks(resp.clone()),
    };
    basic_encode(&wire).expect("wire message encoding is infallible")
}

/// Decode an inbound wire frame into the event it represents.
pub fn decode_event(from: ReplicaId, frame: &[u8]) -> Result<Event, CodecError> {
    let wire: WireMessage =
        basic_decode(frame).map_err(|e| CodecError::Malformed(format!("{e:?}")))?;
    Ok(match wire {
        WireMessage::Propose(proposal) => Event::ProposalReceived {
            peer: from,
            proposal,
        },
        WireMessage::Vote(vote) => Event::VoteReceived { peer: from, vote },
        WireMessage::ReqBlocks(req) => Event::BlockRequestReceived {
            peer: from,
            blk_hashes: req.blk_hashes,
        },
        WireMessage::RespBlocks(resp) => Event::BlocksReceived {
            peer: from,
            blocks: resp.blocks,
        },
    })
}
