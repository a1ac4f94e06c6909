//! Action types for the deterministic state machine.

use crate::{message::OutboundMessage, Event, TimerId};
use braid_messages::VoteGossip;
use braid_types::{Block, Finality, Hash, PublicKey, ReplicaId};
use std::time::Duration;

/// Actions the state machine wants to perform.
///
/// Actions are **commands** - they describe something to do.
/// The runner executes actions and may convert results back into events.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    // ═══════════════════════════════════════════════════════════════════════
    // Network
    // ═══════════════════════════════════════════════════════════════════════
    /// Broadcast a message to all replicas.
    Broadcast { message: OutboundMessage },

    /// Send a message to one replica.
    SendTo {
        peer: ReplicaId,
        message: OutboundMessage,
    },

    /// Request missing blocks from a peer.
    ///
    /// The runner's fetch manager coalesces concurrent requests for the
    /// same hash, retries on other peers, and delivers results back via
    /// `Event::BlocksReceived`.
    FetchBlocks {
        peer: ReplicaId,
        blk_hashes: Vec<Hash>,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════════
    /// Set a timer to fire after a duration.
    SetTimer { id: TimerId, duration: Duration },

    /// Cancel a previously set timer.
    CancelTimer { id: TimerId },

    // ═══════════════════════════════════════════════════════════════════════
    // Internal (fed back as events with Internal priority)
    // ═══════════════════════════════════════════════════════════════════════
    /// Enqueue an internal event for immediate processing.
    ///
    /// Internal events are processed at the same timestamp with higher
    /// priority than external events, preserving causality.
    EnqueueInternal { event: Event },

    // ═══════════════════════════════════════════════════════════════════════
    // Delegated Work (async, returns callback event)
    // ═══════════════════════════════════════════════════════════════════════
    /// Verify a fetched block (structure and carried certificate).
    ///
    /// Delegated to a thread pool in production, instant in simulation.
    /// Returns `Event::BlockVerified` when complete.
    VerifyBlock { blk_hash: Hash, block: Block },

    /// Verify a vote's partial certificate.
    ///
    /// Delegated to a thread pool in production, instant in simulation.
    /// Returns `Event::VoteVerified` when complete.
    VerifyVote {
        /// The vote to verify.
        vote: VoteGossip,
        /// Public key of the voter (pre-resolved by the state machine).
        public_key: PublicKey,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // External Notifications
    // ═══════════════════════════════════════════════════════════════════════
    /// Deliver a commit notification to the host state machine.
    ///
    /// Emitted in log order for every command of every committed block.
    EmitFinality { finality: Finality },

    /// An unrecoverable consensus error.
    ///
    /// Only raised for a breached safety walk; the production runner logs
    /// and aborts, the simulation treats it as a test failure.
    Fatal { reason: String },
}

impl Action {
    /// Check if this action is delegated work (runs on a thread pool,
    /// returns a callback event).
    pub fn is_delegated(&self) -> bool {
        matches!(
            self,
            Action::VerifyBlock { .. } | Action::VerifyVote { .. }
        )
    }

    /// Check if this is an internal event action.
    pub fn is_internal(&self) -> bool {
        matches!(self, Action::EnqueueInternal { .. })
    }

    /// Get the action type name for telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::Broadcast { .. } => "Broadcast",
            Action::SendTo { .. } => "SendTo",
            Action::FetchBlocks { .. } => "FetchBlocks",
            Action::SetTimer { .. } => "SetTimer",
            Action::CancelTimer { .. } => "CancelTimer",
            Action::EnqueueInternal { .. } => "EnqueueInternal",
            Action::VerifyBlock { .. } => "VerifyBlock",
            Action::VerifyVote { .. } => "VerifyVote",
            Action::EmitFinality { .. } => "EmitFinality",
            Action::Fatal { .. } => "Fatal",
        }
    }
}
