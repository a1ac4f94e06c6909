//! Event types for the deterministic state machine.

use braid_messages::{ProposalGossip, VoteGossip};
use braid_types::{Block, Hash, ReplicaId};

/// Priority levels for event ordering within the same timestamp.
///
/// Events at the same time are processed in priority order.
/// Lower values = higher priority (processed first).
///
/// This ensures causality is preserved: internal events (consequences of
/// processing an event) are handled before new external inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum EventPriority {
    /// Internal events: consequences of prior event processing.
    /// Processed first to maintain causality.
    Internal = 0,

    /// Timer events: scheduled by the replica itself.
    Timer = 1,

    /// Network events: external inputs from other replicas.
    Network = 2,

    /// Client events: external inputs from users.
    Client = 3,
}

/// All possible events a replica can receive.
///
/// Events are **passive data** - they describe something that happened.
/// The state machine processes events and returns actions.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    // ═══════════════════════════════════════════════════════════════════════
    // Timers (priority: Timer)
    // ═══════════════════════════════════════════════════════════════════════
    /// Time to prune stale blocks below the committed frontier.
    CleanupTimer,

    // ═══════════════════════════════════════════════════════════════════════
    // Network Messages (priority: Network)
    // ═══════════════════════════════════════════════════════════════════════
    /// Received a block proposal from another replica.
    ///
    /// `peer` is the connection the proposal arrived on; missing ancestors
    /// are fetched from it.
    ProposalReceived {
        peer: ReplicaId,
        proposal: ProposalGossip,
    },

    /// Received a vote for a block.
    ///
    /// Voter identity comes from the vote's partial certificate.
    VoteReceived { peer: ReplicaId, vote: VoteGossip },

    /// A peer asked us for blocks by hash.
    BlockRequestReceived {
        peer: ReplicaId,
        blk_hashes: Vec<Hash>,
    },

    /// Blocks arrived in response to a fetch request.
    BlocksReceived { peer: ReplicaId, blocks: Vec<Block> },

    // ═══════════════════════════════════════════════════════════════════════
    // Internal Events (priority: Internal)
    // ═══════════════════════════════════════════════════════════════════════
    /// The command buffer reached the batch size; a proposal can be built.
    BatchReady { cmds: Vec<Hash> },

    /// A quorum certificate finished forming for a block, or a formed
    /// certificate for it was observed in a proposal.
    QuorumFormed { blk_hash: Hash },

    /// The highest known QC advanced.
    HighQcUpdated { blk_hash: Hash, height: u64 },

    /// A block passed delivery: all ancestors resolved, verification done.
    BlockDelivered { blk_hash: Hash },

    /// This replica broadcast a proposal of its own.
    ProposalEmitted { proposal: ProposalGossip },

    /// A remote proposal finished processing in the safety core.
    ProposalProcessed { proposal: ProposalGossip },

    // ═══════════════════════════════════════════════════════════════════════
    // Async Callbacks (priority: Internal)
    // Results from delegated work (crypto verification)
    // ═══════════════════════════════════════════════════════════════════════
    /// Block verification completed.
    ///
    /// Callback from [`crate::Action::VerifyBlock`].
    BlockVerified { blk_hash: Hash, valid: bool },

    /// Vote signature verification completed.
    ///
    /// Callback from [`crate::Action::VerifyVote`].
    VoteVerified { vote: VoteGossip, valid: bool },

    // ═══════════════════════════════════════════════════════════════════════
    // Client Requests (priority: Client)
    // ═══════════════════════════════════════════════════════════════════════
    /// A client submitted a command for replication.
    CommandSubmitted { cmd_hash: Hash },
}

impl Event {
    /// Get the priority for this event type.
    ///
    /// Events at the same timestamp are processed in priority order,
    /// ensuring causality is preserved.
    pub fn priority(&self) -> EventPriority {
        match self {
            Event::BatchReady { .. }
            | Event::QuorumFormed { .. }
            | Event::HighQcUpdated { .. }
            | Event::BlockDelivered { .. }
            | Event::ProposalEmitted { .. }
            | Event::ProposalProcessed { .. }
            | Event::BlockVerified { .. }
            | Event::VoteVerified { .. } => EventPriority::Internal,

            Event::CleanupTimer => EventPriority::Timer,

            Event::ProposalReceived { .. }
            | Event::VoteReceived { .. }
            | Event::BlockRequestReceived { .. }
            | Event::BlocksReceived { .. } => EventPriority::Network,

            Event::CommandSubmitted { .. } => EventPriority::Client,
        }
    }

    /// Check if this is an internal event (consequence of prior processing).
    pub fn is_internal(&self) -> bool {
        self.priority() == EventPriority::Internal
    }

    /// Get the event type name for telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::CleanupTimer => "CleanupTimer",
            Event::ProposalReceived { .. } => "ProposalReceived",
            Event::VoteReceived { .. } => "VoteReceived",
            Event::BlockRequestReceived { .. } => "BlockRequestReceived",
            Event::BlocksReceived { .. } => "BlocksReceived",
            Event::BatchReady { .. } => "BatchReady",
            Event::QuorumFormed { .. } => "QuorumFormed",
            Event::HighQcUpdated { .. } => "HighQcUpdated",
            Event::BlockDelivered { .. } => "BlockDelivered",
            Event::ProposalEmitted { .. } => "ProposalEmitted",
            Event::ProposalProcessed { .. } => "ProposalProcessed",
            Event::BlockVerified { .. } => "BlockVerified",
            Event::VoteVerified { .. } => "VoteVerified",
            Event::CommandSubmitted { .. } => "CommandSubmitted",
        }
    }
}
